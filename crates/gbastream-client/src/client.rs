use tracing::info;

use gbastream_common::Result;

use crate::bootstrap::{EndpointSource, SessionBootstrap};
use crate::events::EventSender;
use crate::input::{ButtonQueue, InputChannel};
use crate::media::WebRtcConnector;
use crate::session::MediaSession;
use crate::shutdown::ShutdownSignal;
use crate::signaling::WsConnector;
use crate::types::ClientConfig;

/// Bootstraps a session and runs the media and input links side by side
/// until shutdown or until both have given up.
pub async fn run_session<S: EndpointSource>(
    config: ClientConfig,
    source: S,
    events: EventSender,
    mut buttons: ButtonQueue,
    mut shutdown: ShutdownSignal,
) -> Result<()> {
    config.validate()?;

    let bootstrap = SessionBootstrap::new(source, config.init_delay);
    let endpoints = tokio::select! {
        endpoints = bootstrap.endpoints() => endpoints?,
        _ = shutdown.wait() => {
            info!("shutdown requested before the session started");
            return Ok(());
        }
    };
    info!(
        "starting links: media={} input={}",
        endpoints.media_signaling_address, endpoints.input_address
    );

    let media = MediaSession::new(
        endpoints.media_signaling_address,
        WsConnector,
        WebRtcConnector::new(config.ice_servers.clone()),
        config.reconnect,
        config.ping_interval,
        events.clone(),
    );
    let input = InputChannel::new(
        endpoints.input_address,
        WsConnector,
        config.reconnect,
        config.ping_interval,
        events,
    );

    tokio::join!(
        media.run(shutdown.clone()),
        input.run(&mut buttons, shutdown)
    );
    Ok(())
}
