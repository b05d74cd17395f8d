mod connection;

use clap::{Args, Parser, Subcommand};
use connection::DaemonConnection;
use radio_proto::form::{fresh_id, StationForm};
use radio_proto::links::sections;
use radio_proto::protocol::{Command, DaemonState, PlaybackStatus};
use std::time::Duration;

/// How long to wait for the daemon to confirm a change.
const REPLY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "radio-ctl", about = "Control the homepage radio daemon")]
struct Cli {
    /// Daemon address (host:port)
    #[arg(long, global = true, default_value_t = radio_proto::platform::daemon_address())]
    address: String,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List stations and what is playing
    List,
    /// Add a station
    Add(FormArgs),
    /// Edit a station; omitted fields keep their value, "" clears optionals
    Edit {
        id: String,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Remove a station
    Remove { id: String },
    /// Play a station, or stop it if it is the one playing
    Toggle { id: String },
    /// Stop playback
    Stop,
    /// Show or set the volume in percent
    Volume { percent: Option<u8> },
    /// Print the bookmark grid
    Links,
}

#[derive(Args, Debug, Default)]
struct FormArgs {
    #[arg(long)]
    name: Option<String>,
    /// Homepage
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    stream: Option<String>,
    #[arg(long)]
    tracklist: Option<String>,
    /// Defaults to the homepage host
    #[arg(long)]
    domain: Option<String>,
}

impl FormArgs {
    fn apply(self, form: &mut StationForm) {
        let FormArgs {
            name,
            url,
            stream,
            tracklist,
            domain,
        } = self;
        if let Some(v) = name {
            form.name = v;
        }
        if let Some(v) = url {
            form.url = v;
            // A new homepage should bring its own domain unless one is given.
            form.domain.clear();
        }
        if let Some(v) = stream {
            form.stream_url = v;
        }
        if let Some(v) = tracklist {
            form.tracklist_url = v;
        }
        if let Some(v) = domain {
            form.domain = v;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if let Cmd::Links = cli.command {
        print_links();
        return Ok(());
    }

    let mut conn = DaemonConnection::connect(&cli.address).await?;
    let state = tokio::time::timeout(REPLY_TIMEOUT, conn.handshake())
        .await
        .map_err(|_| anyhow::anyhow!("daemon at {} did not say hello", cli.address))??;

    let cmd = match cli.command {
        Cmd::List => {
            print_stations(&state);
            return Ok(());
        }
        Cmd::Volume { percent: None } => {
            println!("{}%", (state.volume * 100.0).round() as u8);
            return Ok(());
        }
        Cmd::Volume {
            percent: Some(pct),
        } => Command::Volume {
            value: (pct as f32 / 100.0).clamp(0.0, 1.0),
        },
        Cmd::Add(args) => {
            let mut form = StationForm::default();
            args.apply(&mut form);
            let station = form.into_record(fresh_id(&state.stations))?;
            println!("adding {} as {}", station.name, station.id);
            Command::AddStation { station }
        }
        Cmd::Edit { id, form: args } => {
            let current = find(&state, &id)?;
            let mut form = StationForm::from_record(current);
            args.apply(&mut form);
            Command::UpdateStation {
                station: form.into_record(id)?,
            }
        }
        Cmd::Remove { id } => {
            find(&state, &id)?;
            Command::RemoveStation { id }
        }
        Cmd::Toggle { id } => {
            find(&state, &id)?;
            Command::TogglePlay { id }
        }
        Cmd::Stop => Command::Stop,
        Cmd::Links => return Ok(()),
    };

    conn.send_command(cmd).await?;
    match tokio::time::timeout(REPLY_TIMEOUT, conn.wait_for_state(state.rev)).await {
        Ok(updated) => print_stations(&updated?),
        // Toggling a station without a stream, or stopping while idle,
        // changes nothing and so produces no new state.
        Err(_) => {
            println!("(no change)");
            print_stations(&state);
        }
    }
    Ok(())
}

fn find<'a>(
    state: &'a DaemonState,
    id: &str,
) -> anyhow::Result<&'a radio_proto::station::StationRecord> {
    state
        .stations
        .iter()
        .find(|s| s.id == id)
        .ok_or_else(|| anyhow::anyhow!("no station with id '{}'", id))
}

fn print_stations(state: &DaemonState) {
    for s in &state.stations {
        let marker = match (&state.playing_id, state.playback_status) {
            (Some(id), PlaybackStatus::Playing) if *id == s.id => "▶",
            (Some(id), PlaybackStatus::Connecting) if *id == s.id => "…",
            _ if s.stream_source().is_none() => " ",
            _ => "·",
        };
        println!("{} {:<8} {:<12} {}", marker, s.id, s.name, s.domain);
    }
    println!("volume {}%", (state.volume * 100.0).round() as u8);
}

fn print_links() {
    for section in sections() {
        println!("{}", section.title);
        for b in section.items {
            println!("  {:<10} {}", b.name, b.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edit_keeps_unset_fields() {
        let mut form = StationForm {
            name: "NTS 1".into(),
            url: "https://www.nts.live/".into(),
            stream_url: "https://stream-relay-geo.ntslive.net/stream".into(),
            domain: "nts.live".into(),
            ..StationForm::default()
        };
        FormArgs {
            name: Some("NTS One".into()),
            stream: Some(String::new()),
            ..FormArgs::default()
        }
        .apply(&mut form);

        assert_eq!(form.name, "NTS One");
        assert_eq!(form.domain, "nts.live");
        let record = form.into_record("7").unwrap();
        assert_eq!(record.stream_url, None);
    }

    #[test]
    fn test_new_url_rederives_domain() {
        let mut form = StationForm {
            name: "Rinse".into(),
            url: "https://rinse.fm".into(),
            domain: "rinse.fm".into(),
            ..StationForm::default()
        };
        FormArgs {
            url: Some("https://www.rinse.co.uk".into()),
            ..FormArgs::default()
        }
        .apply(&mut form);
        assert_eq!(form.into_record("10").unwrap().domain, "rinse.co.uk");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::parse_from(["radio-ctl", "edit", "9", "--stream", ""]);
        match cli.command {
            Cmd::Edit { id, form } => {
                assert_eq!(id, "9");
                assert_eq!(form.stream.as_deref(), Some(""));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
