use anyhow::{Context, Result, bail};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use vpn_link_probe::{
    Outcome, ProbeConfig, Prober, Protocol, ReportFormat, XrayEngine, probe_defaults, read_links,
    resolve_output_path, sort_results, write_report,
};

#[derive(Debug, Parser)]
#[command(
    name = "vpn-link-probe",
    version,
    about = "Parse VPN proxy links and probe their real delay through xray"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Examine config[s] real delay using an http request through the engine
    Probe(ProbeArgs),
    /// Parse config link[s] and print their details
    Parse(ParseArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["config", "file"])))]
struct ProbeArgs {
    /// The config link
    #[arg(short = 'c', long)]
    config: Option<String>,
    /// Read config links from a file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,
    /// Number of links checked at once
    #[arg(short = 't', long = "thread", default_value_t = probe_defaults::THREADS)]
    threads: usize,
    /// The url to test configs against
    #[arg(short = 'u', long, default_value = probe_defaults::TARGET_URL)]
    url: String,
    /// Http method
    #[arg(short = 'm', long, default_value = "GET")]
    method: String,
    /// Show response body
    #[arg(short = 'b', long)]
    body: bool,
    /// Insecure tls connection (fake SNI)
    #[arg(short = 'e', long)]
    insecure: bool,
    /// Speed test with speed.cloudflare.com
    #[arg(short = 'p', long)]
    speedtest: bool,
    /// Download and upload amount (KB)
    #[arg(
        short = 'a',
        long,
        default_value_t = probe_defaults::SPEEDTEST_AMOUNT_KB,
        value_parser = clap::value_parser!(u32)
            .range(0..=i64::from(probe_defaults::MAX_SPEEDTEST_AMOUNT_KB))
    )]
    amount: u32,
    /// Verbose engine output
    #[arg(short = 'v', long)]
    verbose: bool,
    /// Output type
    #[arg(short = 'x', long = "type", value_enum, default_value_t = ReportFormat::Txt)]
    format: ReportFormat,
    /// Output file for valid config links [default: valid.txt, valid.csv for csv]
    #[arg(short = 'o', long)]
    out: Option<PathBuf>,
    /// Sort config links by their delay (fast to slow)
    #[arg(short = 's', long, default_value_t = true, action = ArgAction::Set)]
    sort: bool,
    /// Path to the xray binary
    #[arg(long, default_value = "xray")]
    xray: PathBuf,
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["config", "file"])))]
struct ParseArgs {
    /// The config link
    #[arg(short = 'c', long)]
    config: Option<String>,
    /// Read config links from a file
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,
    /// Print the summary record as JSON
    #[arg(long, conflicts_with = "outbound")]
    json: bool,
    /// Print the engine outbound as JSON
    #[arg(long)]
    outbound: bool,
    /// Allow insecure TLS in the built outbound
    #[arg(short = 'e', long)]
    insecure: bool,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .init();
}

fn input_links(config: Option<String>, file: Option<PathBuf>) -> Result<Vec<String>> {
    match (config, file) {
        (_, Some(path)) => Ok(read_links(&path)?),
        (Some(link), None) => Ok(vec![link.trim().to_string()]),
        (None, None) => bail!("either --config or --file is required"),
    }
}

async fn probe(args: ProbeArgs) -> Result<()> {
    let method = reqwest::Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid http method {:?}", args.method))?;
    let config = ProbeConfig::builder()
        .threads(args.threads)
        .target_url(args.url)
        .method(method)
        .show_body(args.body)
        .allow_insecure(args.insecure)
        .speedtest(args.speedtest)
        .speedtest_amount_kb(args.amount)
        .verbose(args.verbose)
        .build();
    let engine = Arc::new(XrayEngine::new(args.xray, config.verbose));
    let prober = Prober::new(engine, config);

    let Some(path) = args.file else {
        let link = args.config.unwrap_or_default();
        return match prober.probe_one(link.trim()).await {
            Outcome::Measured(result) => {
                if prober.config().speedtest {
                    info!(
                        "Download: {:.2} Mbps, Upload: {:.2} Mbps",
                        result.download, result.upload
                    );
                }
                Ok(())
            }
            Outcome::Skipped { reason, .. } => Err(reason.into()),
        };
    };

    let links = read_links(&path)?;
    info!("Probing {} links with {} workers", links.len(), prober.config().threads);
    let mut results = prober.run(links).await;
    if args.sort {
        sort_results(&mut results);
    }

    let out = resolve_output_path(args.format, args.out);
    let saved = write_report(&out, args.format, &results)
        .with_context(|| "saving configs failed")?;
    info!(
        "A total of {} configurations have been saved to {}",
        saved,
        out.display()
    );
    Ok(())
}

fn parse(args: ParseArgs) -> Result<()> {
    let links = input_links(args.config, args.file)?;
    let single = links.len() == 1;
    let mut failed = 0;

    for (index, link) in links.iter().enumerate() {
        let protocol = match Protocol::parse(link) {
            Ok(protocol) => protocol,
            Err(e) if single => return Err(e).context("couldn't parse the config"),
            Err(e) => {
                warn!("Config Number {}: {}", index + 1, e);
                failed += 1;
                continue;
            }
        };

        if args.json {
            println!("{}", serde_json::to_string_pretty(&protocol.summary())?);
        } else if args.outbound {
            match protocol.build_outbound(args.insecure) {
                Ok(outbound) => println!("{}", serde_json::to_string_pretty(&outbound)?),
                Err(e) if single => return Err(e).context("couldn't build the outbound"),
                Err(e) => {
                    warn!("Config Number {}: {}", index + 1, e);
                    failed += 1;
                }
            }
        } else {
            println!("{}", protocol.details());
        }
    }

    if failed > 0 {
        warn!("{} of {} links failed", failed, links.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Probe(args) => {
            init_logging(args.verbose);
            probe(args).await
        }
        Commands::Parse(args) => {
            init_logging(false);
            parse(args)
        }
    }
}
