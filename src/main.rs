use std::{env, process::exit, str::FromStr};

use log::error;
use scpi_link::{LinkConfig, Session, error::Result};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        println!("Usage: {} <uri> [command ...]", args[0]);
        println!("  <uri>:");
        println!("    tcp://<host>[:<port>]: SCPI over raw TCP (default port 8802)");
        println!("    serial:<port>[?baud=<baud>]: SCPI over serial (default 9600 baud)");
        println!("    gpib-ni://[<board>/]<address>: GPIB through an NI-488.2 driver");
        println!("    gpib-contec://<address>: GPIB through a CONTEC driver");
        println!("    Any URI takes ?timeout=<secs> for the response timeout");
        println!("  [command ...]");
        println!("    Commands to run, read from stdin (one per line) if none are given.");
        println!("    Commands containing '?' wait for a response.");
        exit(1);
    }

    let config = LinkConfig::from_str(&args[1])?;
    println!("scpi-link {}: {}", scpi_link::version(), config.endpoint);

    let mut session = Session::new();
    session.open(config).await?;

    if args.len() > 2 {
        for cmd in &args[2..] {
            run_command(&mut session, cmd).await;
        }
    } else {
        run_stdin(&mut session).await?;
    }

    session.close().await?;

    Ok(())
}

async fn run_stdin(session: &mut Session) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let cmd = line.trim();
        if cmd.is_empty() {
            continue;
        }
        run_command(session, cmd).await;
    }

    Ok(())
}

/// Run one command, printing the response line (or a placeholder in its
/// place) for queries
async fn run_command(session: &mut Session, cmd: &str) {
    if is_query_command(cmd) {
        match session.query(cmd).await {
            Ok(resp) => println!("{resp}"),
            Err(e) => {
                error!("{cmd}: {e}");
                println!("{}", e.sentinel());
            }
        }
    } else if let Err(e) = session.send(cmd).await {
        error!("{cmd}: {e}");
    }
}

/// Commands containing a question mark are expected to produce a response
fn is_query_command(cmd: &str) -> bool {
    cmd.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_detection() {
        assert!(is_query_command("*IDN?"));
        assert!(is_query_command(":MEMory:VREAL? CH1_1"));
        assert!(!is_query_command("*RST"));
        assert!(!is_query_command(":STARt"));
    }
}
