use clap::{Arg, ArgMatches, Command};
use serde_json::Value;
use std::process;

fn url_arg() -> Arg {
    Arg::new("url")
        .short('u')
        .long("url")
        .value_name("URL")
        .help("Control-plane base URL")
        .default_value("http://localhost:8081")
}

fn base_url(matches: &ArgMatches) -> &str {
    matches.get_one::<String>("url").unwrap()
}

#[tokio::main]
async fn main() {
    let matches = Command::new("janus")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Command-line interface for the janus reverse proxy control plane")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("status")
                .about("Check control-plane health")
                .arg(url_arg()),
        )
        .subcommand(
            Command::new("routes")
                .about("List installed routes")
                .arg(url_arg()),
        )
        .subcommand(
            Command::new("stats")
                .about("Show per-vhost request stats")
                .arg(url_arg())
                .arg(Arg::new("vhost").help("Limit output to one vhost")),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("status", sub)) => status(base_url(sub)).await,
        Some(("routes", sub)) => routes(base_url(sub)).await,
        Some(("stats", sub)) => {
            stats(base_url(sub), sub.get_one::<String>("vhost").cloned()).await
        }
        _ => unreachable!(),
    };

    if let Err(err) = result {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

async fn status(base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = reqwest::get(format!("{}/health", base)).await?.json().await?;
    println!("status:  {}", body["status"].as_str().unwrap_or("unknown"));
    println!("version: {}", body["version"].as_str().unwrap_or("unknown"));
    Ok(())
}

async fn routes(base: &str) -> Result<(), Box<dyn std::error::Error>> {
    let routes: Vec<Value> = reqwest::get(format!("{}/api/v1/routes", base))
        .await?
        .json()
        .await?;

    if routes.is_empty() {
        println!("no routes installed");
        return Ok(());
    }
    for route in routes {
        println!(
            "{}  strategy={}  backends={}  max_active={}  max_queued={}",
            route["vhost"].as_str().unwrap_or("?"),
            route["strategy"].as_str().unwrap_or("?"),
            route["backends"].as_array().map(Vec::len).unwrap_or(0),
            route["max_active"],
            route["max_queued"],
        );
    }
    Ok(())
}

async fn stats(base: &str, vhost: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    match vhost {
        Some(vhost) => {
            let response = reqwest::get(format!("{}/api/v1/stats/{}", base, vhost)).await?;
            if response.status().as_u16() == 404 {
                return Err(format!("no stats recorded for {}", vhost).into());
            }
            print_stats(&vhost, &response.json().await?);
        }
        None => {
            let all: Value = reqwest::get(format!("{}/api/v1/stats", base))
                .await?
                .json()
                .await?;
            match all.as_object() {
                Some(map) if !map.is_empty() => {
                    for (vhost, stats) in map {
                        print_stats(vhost, stats);
                    }
                }
                _ => println!("no stats recorded"),
            }
        }
    }
    Ok(())
}

fn print_stats(vhost: &str, stats: &Value) {
    println!(
        "{}  total={} active={} errors={} avg_latency_ms={:.1}",
        vhost,
        stats["requests_total"],
        stats["requests_active"],
        stats["errors_total"],
        stats["avg_latency_ms"].as_f64().unwrap_or(0.0),
    );
}
