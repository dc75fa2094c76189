mod display;
mod input;
mod network;
mod state;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use input::Action;
use network::NetEvent;
use state::Session;

/// Buzzline Client - line-oriented quiz buzzer
#[derive(Parser, Debug)]
#[command(name = "buzzline-client", version, about)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9877")]
    server: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "buzzline_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let (tx, mut rx) = network::connect(&args.server).await?;
    tracing::info!("Connected to {}", args.server);

    let mut session = Session::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match input::parse(&line, &session) {
                    Ok(Action::Send(msg)) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(Action::Help) => println!("{}", input::HELP),
                    Ok(Action::Quit) => break,
                    Err(e) => println!("{}", e),
                }
            }
            event = rx.recv() => match event {
                Some(NetEvent::Message(msg)) => {
                    session.apply(&msg);
                    println!("{}", display::render(&msg, &session));
                }
                Some(NetEvent::Problem(reason)) => println!("warning: {}", reason),
                Some(NetEvent::Closed) | None => {
                    println!("Disconnected from server.");
                    break;
                }
            }
        }
    }

    Ok(())
}
