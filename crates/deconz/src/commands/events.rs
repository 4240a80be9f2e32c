//! `deconz events`: print every push event verbatim.

use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use deconz_core::{Gateway, GatewayConfig, SocketEvent};

use crate::cli::{EventsArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn describe(event: &SocketEvent) -> Option<String> {
    let text = match event {
        SocketEvent::Connecting { attempt } => format!("connecting (attempt {attempt})"),
        SocketEvent::Open => "open".into(),
        SocketEvent::Message(_) => return None,
        SocketEvent::MalformedFrame(raw) => format!("malformed frame: {raw}"),
        SocketEvent::TransportError(e) => format!("transport error: {e}"),
        SocketEvent::PongTimeout => "pong timeout".into(),
        SocketEvent::Unauthorized => "unauthorized".into(),
        SocketEvent::MaxRetries {
            max_retries,
            attempts,
        } => format!("{attempts} failed attempts (limit {max_retries}); still retrying"),
        SocketEvent::Close { code, reason } => format!("closed ({code}) {reason}"),
    };
    Some(text)
}

pub async fn handle(
    config: GatewayConfig,
    args: EventsArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let gateway = Gateway::new(config)?;
    let mut raw = gateway.raw_events();
    let mut lifecycle = gateway.socket_events();
    gateway.connect().await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            biased;

            _ = &mut ctrl_c => break,

            frame = raw.recv() => match frame {
                Ok(frame) => {
                    let out = output::render_single(
                        &global.output,
                        &*frame,
                        output::render_json_compact,
                        output::render_json_compact,
                    );
                    output::print_output(&out, global.quiet);
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event output lagged"),
                Err(RecvError::Closed) => break,
            },

            event = lifecycle.recv(), if args.lifecycle => match event {
                Ok(event) => {
                    if let Some(text) = describe(&event) {
                        eprintln!("# {text}");
                    }
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    gateway.close().await;
    Ok(())
}
