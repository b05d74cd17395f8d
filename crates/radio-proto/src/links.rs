//! Fixed bookmark grid shown next to the radio list.  Read-only.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bookmark {
    pub id: &'static str,
    pub name: &'static str,
    pub url: &'static str,
    pub domain: &'static str,
}

pub const NEWS: &[Bookmark] = &[
    Bookmark {
        id: "1",
        name: "The Guardian",
        url: "https://www.theguardian.com/uk",
        domain: "theguardian.com",
    },
    Bookmark {
        id: "2",
        name: "AT5",
        url: "https://www.at5.nl",
        domain: "at5.nl",
    },
    Bookmark {
        id: "3",
        name: "NOS",
        url: "https://nos.nl",
        domain: "nos.nl",
    },
    Bookmark {
        id: "4",
        name: "RA",
        url: "https://ra.co",
        domain: "ra.co",
    },
];

pub const TOOLS: &[Bookmark] = &[
    Bookmark {
        id: "5",
        name: "Claude",
        url: "https://claude.ai",
        domain: "claude.ai",
    },
    Bookmark {
        id: "6",
        name: "Akhi Gym",
        url: "https://www.akhigym.nl/blank-2",
        domain: "akhigym.nl",
    },
];

/// A titled group of bookmarks, the unit the grid renders.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub title: &'static str,
    pub items: &'static [Bookmark],
}

pub fn sections() -> Vec<Section> {
    vec![
        Section {
            title: "News",
            items: NEWS,
        },
        Section {
            title: "Tools",
            items: TOOLS,
        },
    ]
}
