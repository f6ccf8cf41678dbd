//! Terminal client: typed lines go to the hub, hub lines go to stdout.

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
};
use tracing::{debug, info, warn};

use crate::{
    cli::ConnectArgs,
    line::{LineReader, write_line},
};

/// Typed on its own line, ends the client without sending anything.
const QUIT: &str = "/quit";

#[derive(Debug, PartialEq, Eq)]
enum Exit {
    HubClosed,
    Quit,
    InputClosed,
    Interrupted,
}

pub async fn run(args: ConnectArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("could not reach chat hub at {}", args.server))?;
    info!(server = %args.server, "connected to chat hub");

    let (from_hub, mut to_hub) = stream.into_split();
    let mut from_hub = LineReader::new(from_hub);
    let mut keyboard = LineReader::new(tokio::io::stdin());
    let mut screen = tokio::io::stdout();

    let outcome = relay(&mut from_hub, &mut to_hub, &mut keyboard, &mut screen).await;

    if let Err(error) = to_hub.shutdown().await {
        warn!(?error, "failed to hang up on the hub cleanly");
    }
    let exit = outcome?;
    debug!(?exit, "client stopped");
    Ok(())
}

/// Shuttles lines between the hub and the terminal until either side ends.
///
/// Both readers keep partial lines internally, so the branch that loses a
/// `select!` round drops nothing.
async fn relay<H, T, K, S>(
    from_hub: &mut LineReader<H>,
    to_hub: &mut T,
    keyboard: &mut LineReader<K>,
    screen: &mut S,
) -> Result<Exit>
where
    H: AsyncRead + Unpin,
    T: AsyncWrite + Unpin,
    K: AsyncRead + Unpin,
    S: AsyncWrite + Unpin,
{
    loop {
        select! {
            incoming = from_hub.next_line() => match incoming.context("reading from the hub")? {
                Some(line) => write_line(screen, &line).await?,
                None => {
                    write_line(screen, "*** server closed the connection").await?;
                    return Ok(Exit::HubClosed);
                }
            },
            typed = keyboard.next_line() => match typed.context("reading from stdin")? {
                Some(line) if line.trim() == QUIT => {
                    write_line(screen, "*** leaving chat").await?;
                    return Ok(Exit::Quit);
                }
                Some(line) => write_line(to_hub, &line)
                    .await
                    .context("sending a line to the hub")?,
                None => return Ok(Exit::InputClosed),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(error) = signal {
                    warn!(?error, "ctrl-c handler failed");
                }
                return Ok(Exit::Interrupted);
            }
        }
    }
}
