use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::{
    cli::ClientArgs,
    codec::{LineCodec, MAX_LINE_LEN, MAX_REPLY_LEN},
    error::RequestError,
    protocol::{Command, Reply, canonical_member_list, is_legal_name, parse_member_list},
};

type ServerLines = FramedRead<OwnedReadHalf, LineCodec>;
type ServerWriter = FramedWrite<OwnedWriteHalf, LineCodec>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut lines, mut writer) = establish_connection(&args).await?;
    register(&mut lines, &mut writer, &args.name).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    run_client_loop(&mut lines, &mut writer, &mut stdin, &args.name).await
}

async fn establish_connection(args: &ClientArgs) -> Result<(ServerLines, ServerWriter)> {
    let stream = TcpStream::connect((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", args.host, args.port))?;

    info!("connected to {}:{}", args.host, args.port);

    let (reader, writer) = stream.into_split();
    Ok((
        FramedRead::new(reader, LineCodec::with_max_length(MAX_REPLY_LEN)),
        FramedWrite::new(writer, LineCodec::new()),
    ))
}

async fn register(lines: &mut ServerLines, writer: &mut ServerWriter, name: &str) -> Result<()> {
    let request = Command::Name {
        name: name.to_string(),
    };
    writer
        .send(request.to_string())
        .await
        .context("failed to send client name")?;

    let reply = next_server_line(lines).await?;
    if reply == Reply::Shutdown.to_string() {
        bail!("server is shutting down");
    }
    write_stdout(&reply).await?;
    if reply != Reply::Connected.to_string() {
        bail!("server refused name {name:?}");
    }
    Ok(())
}

async fn run_client_loop(
    lines: &mut ServerLines,
    writer: &mut ServerWriter,
    stdin: &mut io::Lines<BufReader<io::Stdin>>,
    own_name: &str,
) -> Result<()> {
    loop {
        select! {
            server_line = next_server_line(lines) => {
                handle_server_line(server_line?).await?;
            }
            input = stdin.next_line() => {
                // A closed terminal leaves the chat the same way `exit` does.
                let input = input.context("failed to read stdin")?;
                let input = input.as_deref().unwrap_or("exit");
                if handle_stdin_input(input, lines, writer, own_name).await? {
                    return Ok(());
                }
            }
        }
    }
}

/// Prints a line pushed or replied by the server. A pushed `exit` ends the
/// session with an error.
async fn handle_server_line(line: String) -> Result<()> {
    if line == Reply::Shutdown.to_string() {
        bail!("server shut down");
    }
    write_stdout(&line).await?;
    Ok(())
}

/// Validates and forwards one typed line. Returns `true` once the client has
/// unregistered and should stop.
async fn handle_stdin_input(
    input: &str,
    lines: &mut ServerLines,
    writer: &mut ServerWriter,
    own_name: &str,
) -> Result<bool> {
    let input = input.trim_end_matches('\r');
    if input.is_empty() {
        return Ok(false);
    }

    let request = match prepare_request(input, own_name) {
        Ok(request) => request,
        Err(refused) => {
            debug!(%input, "request refused locally");
            write_stdout(&refused.to_string()).await?;
            return Ok(false);
        }
    };

    let is_exit = request == Command::Exit;
    writer
        .send(request.to_string())
        .await
        .context("failed to send request")?;

    if is_exit {
        await_unregistered(lines).await?;
        return Ok(true);
    }
    Ok(false)
}

/// Waits for the reply to `exit`, printing any message pushed before it.
async fn await_unregistered(lines: &mut ServerLines) -> Result<()> {
    let unregistered = Reply::Unregistered.to_string();
    loop {
        let line = next_server_line(lines).await?;
        if line == unregistered {
            write_stdout(&line).await?;
            return Ok(());
        }
        handle_server_line(line).await?;
    }
}

async fn next_server_line(lines: &mut ServerLines) -> Result<String> {
    match lines.next().await {
        Some(line) => line.context("failed to receive from server"),
        None => bail!("server closed the connection"),
    }
}

/// Turns a typed line into a request, refusing what the server would reject
/// anyway.
///
/// Group member lists are sent sorted and deduplicated.
pub fn prepare_request(input: &str, own_name: &str) -> Result<Command, RequestError> {
    // The server drops a connection that sends an oversized line.
    if input.len() >= MAX_LINE_LEN {
        return Err(RequestError::InvalidInput);
    }

    let (keyword, args) = match input.split_once(' ') {
        Some((keyword, args)) => (keyword, Some(args)),
        None => (input, None),
    };

    match keyword {
        "create_group" => {
            let args = args.unwrap_or_default();
            let (group, members) = args.split_once(' ').unwrap_or((args, ""));
            let well_formed = is_legal_name(group)
                && group != own_name
                && !members.is_empty()
                && members.split(',').all(is_legal_name);
            if !well_formed {
                return Err(RequestError::CreateGroup(group.to_string()));
            }
            Ok(Command::CreateGroup {
                group: group.to_string(),
                members: canonical_member_list(&parse_member_list(members)),
            })
        }
        "send" => match args.and_then(|args| args.split_once(' ')) {
            Some((target, text)) if is_legal_name(target) && target != own_name => {
                Ok(Command::Send {
                    target: target.to_string(),
                    text: text.to_string(),
                })
            }
            _ => Err(RequestError::Send),
        },
        "who" if args.is_none() => Ok(Command::Who),
        "who" => Err(RequestError::Who),
        "exit" if args.is_none() => Ok(Command::Exit),
        _ => Err(RequestError::InvalidInput),
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
