use clap::Parser;
use std::future::Future;
use std::io::{self, BufRead};
use std::time::Duration;
use tracing::{error, info, warn};

use gbastream_client::{
    event_channel, input_handle, run_session, shutdown_channel, ClientConfig, EventReceiver,
    KeyMap, SessionEndpoints, SessionEvent, StaticEndpoints,
};
use gbastream_common::ButtonAction;

#[derive(Parser, Debug)]
#[command(name = "gbastream-client")]
struct Args {
    /// Media signaling endpoint (ws:// or wss://)
    #[arg(long, env = "GBASTREAM_VIDEO_URL")]
    video_url: String,
    /// Input endpoint (ws:// or wss://)
    #[arg(long, env = "GBASTREAM_INPUT_URL")]
    input_url: String,
    /// Delay before the links start, in seconds
    #[arg(long)]
    init_delay_secs: Option<u64>,
    #[arg(long)]
    ping_interval_ms: Option<u64>,
    /// Reconnect attempts before giving up (0 disables reconnecting)
    #[arg(long)]
    reconnect_attempts: Option<u32>,
    #[arg(long)]
    reconnect_backoff_ms: Option<u64>,
    /// STUN/TURN server URL (repeatable)
    #[arg(long = "ice-server", value_name = "URL")]
    ice_servers: Vec<String>,
    /// Read button commands from stdin as: `<down|up> <KEY>`
    #[arg(long, default_value_t = false)]
    stdin_input: bool,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(secs) = self.init_delay_secs {
            config.init_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = self.ping_interval_ms {
            config.ping_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.reconnect_attempts {
            config.reconnect.ceiling = attempts;
        }
        if let Some(ms) = self.reconnect_backoff_ms {
            config.reconnect.backoff = Duration::from_millis(ms);
        }
        if !self.ice_servers.is_empty() {
            config.ice_servers = self.ice_servers.clone();
        }
    }
}

fn parse_button_line(line: &str) -> Result<(ButtonAction, String), String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("empty command".into());
    }

    let mut parts = trimmed.split_whitespace();
    let action = parts
        .next()
        .ok_or_else(|| "missing action".to_string())?
        .parse::<ButtonAction>()
        .map_err(|e| e.to_string())?;
    let key = parts
        .next()
        .ok_or_else(|| "missing key".to_string())?
        .to_string();

    if parts.next().is_some() {
        return Err("expected exactly two tokens: <down|up> <KEY>".into());
    }

    Ok((action, key))
}

fn log_event(event: SessionEvent) {
    match event {
        SessionEvent::ConnectionChanged {
            channel,
            connected,
            connection_state,
            ice_state,
        } => info!(
            "{} link connected={} state={} ice={}",
            channel,
            connected,
            connection_state.map_or("-", |s| s.as_str()),
            ice_state.map_or("-", |s| s.as_str()),
        ),
        SessionEvent::PingUpdate {
            channel,
            rtt_millis,
        } => info!("{} ping: {} ms", channel, rtt_millis),
        SessionEvent::ButtonPressed { key, action } => info!("button {} {}", key, action),
        SessionEvent::TrackAvailable(track) => {
            info!("{:?} track {} available", track.kind, track.id)
        }
        SessionEvent::ReconnectScheduled {
            channel,
            attempt,
            delay,
        } => warn!(
            "{} link reconnecting (attempt {}) in {:?}",
            channel, attempt, delay
        ),
        SessionEvent::Terminal { channel } => {
            error!("{} link disconnected; restart to reconnect", channel)
        }
    }
}

/// Logs session events while `session` runs, then whatever it emitted on the
/// way out. The receiver never closes on its own since the stdin thread holds
/// a sender.
async fn run_logged<F>(session: F, events: &mut EventReceiver) -> gbastream_common::Result<()>
where
    F: Future<Output = gbastream_common::Result<()>>,
{
    tokio::pin!(session);
    let result = loop {
        tokio::select! {
            result = &mut session => break result,
            Some(event) = events.recv() => log_event(event),
        }
    };
    while let Ok(event) = events.try_recv() {
        log_event(event);
    }
    result
}

fn main() -> anyhow::Result<()> {
    gbastream_common::init_tracing();

    let args = Args::parse();
    let mut config = ClientConfig::from_env()?;
    args.apply(&mut config);
    config.validate()?;

    let endpoints = SessionEndpoints::new(args.video_url, args.input_url);
    let (events_tx, mut events_rx) = event_channel();
    let (handle, buttons) = input_handle(KeyMap::default(), events_tx.clone());

    if args.stdin_input {
        std::thread::spawn(move || {
            eprintln!("Button input enabled on stdin: use `<down|up> <KEY>`");
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => match parse_button_line(&line) {
                        Ok((action, key)) => {
                            handle.dispatch(&key, action);
                        }
                        Err(err) => {
                            eprintln!("invalid button command `{}`: {}", line.trim(), err);
                        }
                    },
                    Err(err) => {
                        eprintln!("stdin read error: {}", err);
                        break;
                    }
                }
            }
        });
    }

    let (trigger, shutdown) = shutdown_channel();

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(async move {
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, closing links");
                    trigger.trigger();
                }
            });
            let session = run_session(
                config,
                StaticEndpoints(endpoints),
                events_tx,
                buttons,
                shutdown,
            );
            run_logged(session, &mut events_rx).await?;
            Ok::<(), anyhow::Error>(())
        })
}
