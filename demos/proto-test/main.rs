use std::{env, process::exit, str::FromStr, time::Duration};

use scpi_link::{LinkConfig, Session};
use tokio::time::Instant;

fn ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        println!("Usage: ... <uri>");
        println!("  <uri>:");
        println!("    tcp://<host>[:<port>]: SCPI over raw TCP");
        println!("    serial:<port>[?baud=<baud>]: SCPI over serial");
        println!("    gpib-ni://[<board>/]<address>: SCPI over GPIB (NI-488.2)");
        println!("    gpib-contec://<address>: SCPI over GPIB (CONTEC)");
        exit(1);
    }

    let config = LinkConfig::from_str(&args[1])?;

    let start = Instant::now();
    let mut session = Session::new();
    session.open(config).await?;
    println!("Open: {} ms", ms(start));

    let start = Instant::now();
    let discarded = session.drain(Duration::from_millis(100)).await?;
    println!("Drain (100 ms): {} ms, {discarded} bytes", ms(start));

    let start = Instant::now();
    session.send("*IDN?").await?;
    println!("Send: {} ms", ms(start));

    let start = Instant::now();
    let data = session.drain(Duration::from_millis(500)).await?;
    println!("Recv (drain 500 ms): {} ms, {data} bytes", ms(start));

    let start = Instant::now();
    let idn = session.query("*IDN?").await?;
    println!("Query: {} ms", ms(start));
    println!("  Data: {idn}");

    let start = Instant::now();
    let model = session.identify().await?;
    println!("Identify: {} ms", ms(start));
    println!("  Model: {model} ({:?})", model.man_family);

    /* A command without a response, the query has to run into its timeout */
    let start = Instant::now();
    let resp = session
        .query_with_timeout("*CLS", Duration::from_secs(1))
        .await;
    println!("Query (no response, 1 sec): {} ms", ms(start));
    if let Err(e) = resp {
        println!("  Error: {e}");
    }

    let start = Instant::now();
    session.close().await?;
    println!("Close: {} ms", ms(start));

    Ok(())
}
