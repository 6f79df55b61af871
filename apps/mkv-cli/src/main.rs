use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use mkv_registers as mkv;
use mkv_registers::{CompiledModel, MetricDefinition, MetricValue, QueryPlan, RawValueIndex};
use mkv_transport::{HttpTransport, MockTransport, QuestionTransport};

#[derive(Parser, Debug)]
#[command(
    name = "mkv",
    version,
    about = "MKV compressor controller register decoder",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Http,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the registers a plan asks for
    Plan {
        /// Plan hex (6 hex digits per register)
        #[arg(long, conflicts_with = "model")]
        hex: Option<String>,
        /// Drop an incomplete trailing slot instead of failing
        #[arg(long, action = ArgAction::SetTrue)]
        truncate: bool,
        /// Device model YAML file
        #[arg(long)]
        model: Option<String>,
    },
    /// Decode a captured answer to the model's full question
    Decode {
        /// Device model YAML file
        #[arg(long)]
        model: String,
        /// Raw answer text
        #[arg(long)]
        answer: String,
        /// Print JSON instead of a table
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Poll a controller and print decoded metrics
    Poll {
        /// Device model YAML file
        #[arg(long)]
        model: String,
        /// Controller host or host:port
        #[arg(long, default_value = "192.168.100.100")]
        host: String,
        /// Transport backend
        #[arg(long, value_enum, default_value_t = Backend::Http)]
        backend: Backend,
        /// CGI path on the controller
        #[arg(long, default_value = mkv_transport::DEFAULT_ENDPOINT)]
        endpoint: String,
        /// Per-question timeout in milliseconds
        #[arg(long, default_value_t = 5000u64)]
        timeout_ms: u64,
        /// Number of cycles (0 to poll until interrupted)
        #[arg(long, default_value_t = 1u32)]
        count: u32,
        /// Seconds between cycles
        #[arg(long, default_value_t = 10u64)]
        interval_s: u64,
        /// Answer to the full question used to seed the mock controller
        #[arg(long)]
        mock_answer: Option<String>,
        /// Print JSON reports instead of tables
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
        /// Print Prometheus counters after each cycle
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Validate device models
    ModelValidate {
        /// YAML file path
        #[arg(long)]
        file: Option<String>,
        /// Directory containing YAML models
        #[arg(long)]
        dir: Option<String>,
        /// Print JSON after validation
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List models from a directory
    ModelList {
        /// Directory containing YAML models
        #[arg(long, default_value = "configs/models")]
        dir: String,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            hex,
            truncate,
            model,
        } => plan_show(hex.as_deref(), truncate, model.as_deref()),
        Commands::Decode {
            model,
            answer,
            json,
        } => decode(&model, &answer, json),
        Commands::Poll {
            model,
            host,
            backend,
            endpoint,
            timeout_ms,
            count,
            interval_s,
            mock_answer,
            json,
            metrics,
        } => poll(
            &model,
            backend,
            &host,
            &endpoint,
            Duration::from_millis(timeout_ms),
            count,
            Duration::from_secs(interval_s),
            mock_answer.as_deref(),
            json,
            metrics,
        ),
        Commands::ModelValidate { file, dir, json } => {
            model_validate(file.as_deref(), dir.as_deref(), json)
        }
        Commands::ModelList { dir } => model_list(&dir),
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn plan_show(hex: Option<&str>, truncate: bool, model: Option<&str>) -> Result<()> {
    let plan = match (hex, model) {
        (Some(h), None) => {
            let policy = if truncate {
                mkv::TrailingPolicy::Truncate
            } else {
                mkv::TrailingPolicy::Reject
            };
            QueryPlan::from_hex_with(h, policy)?
        }
        (None, Some(m)) => mkv::load_model_file(m)?.plan,
        _ => return Err(anyhow::anyhow!("provide --hex <plan> or --model <file>")),
    };
    for (i, key) in plan.keys().iter().enumerate() {
        println!("{i}\t{key}\t{}", key.question_hex());
    }
    println!("question: {}", plan.question());
    Ok(())
}

#[derive(Serialize)]
struct DecodeOutput<'a> {
    model: &'a str,
    resyncs: usize,
    padded: usize,
    metrics: &'a BTreeMap<String, MetricValue>,
}

fn decode(model_path: &str, answer: &str, json: bool) -> Result<()> {
    let model = mkv::load_model_file(model_path)?;
    let scan = mkv::scan(&model.plan, answer);
    let index = RawValueIndex::build(&model.plan, &scan.tokens);
    let metrics = mkv::evaluate(&model.metrics, &index);
    if json {
        let out = DecodeOutput {
            model: &model.name,
            resyncs: scan.resyncs,
            padded: scan.padded,
            metrics: &metrics,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_table(&model.metrics, &metrics, &index);
        if scan.resyncs > 0 || scan.padded > 0 {
            println!("resyncs={} padded={}", scan.resyncs, scan.padded);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn poll(
    model_path: &str,
    backend: Backend,
    host: &str,
    endpoint: &str,
    timeout: Duration,
    count: u32,
    interval: Duration,
    mock_answer: Option<&str>,
    json: bool,
    show_metrics: bool,
) -> Result<()> {
    let model = mkv::load_model_file(model_path)?;
    let hub = mkv::MetricsHub::new().map_err(|e| anyhow::anyhow!(e))?;
    hub.poll.models_loaded.set(1);

    let mut transport: Box<dyn QuestionTransport> = match backend {
        Backend::Http => Box::new(HttpTransport::open_with(host, endpoint, timeout)?),
        Backend::Mock => Box::new(seeded_mock(&model, mock_answer)),
    };
    info!(model = %model.name, controller = transport.label(), "polling");

    let poller = mkv::Poller::new(&model).with_metrics(&hub);
    let mut cycle = 0u32;
    loop {
        if cycle > 0 {
            thread::sleep(interval);
        }
        match poller.poll_once(transport.as_mut()) {
            Ok(report) => {
                if json {
                    println!("{}", serde_json::to_string(&report)?);
                } else {
                    println!("# {} {}", report.model, report.ts);
                    print_table(&model.metrics, &report.metrics, &report.index);
                    for f in &report.failures {
                        println!("failed: {} ({})", f.question, f.error);
                    }
                }
            }
            Err(e) => error!(model = %model.name, error = %e, "poll cycle failed"),
        }
        if show_metrics {
            print!("{}", hub.encode_text());
        }
        cycle += 1;
        if count != 0 && cycle >= count {
            break;
        }
    }
    Ok(())
}

/// A mock controller whose registers come from a captured answer to the full question.
fn seeded_mock(model: &CompiledModel, answer: Option<&str>) -> MockTransport {
    let mut mock = MockTransport::new("mock0");
    if let Some(answer) = answer {
        let tokens = mkv::tokenize(&model.plan, answer);
        for (key, token) in model.plan.keys().iter().zip(tokens) {
            if let mkv::RawToken::Word(word) = token {
                mock.set_register(&key.to_string(), word);
            }
        }
    }
    mock
}

fn model_validate(file: Option<&str>, dir: Option<&str>, json: bool) -> Result<()> {
    match (file, dir) {
        (Some(f), None) => {
            let raw = mkv::read_model_file(f)?;
            let model = raw.compile()?;
            println!(
                "ok: {} (registers={}, metrics={}, consensus={})",
                model.name,
                model.plan.len(),
                model.metrics.len(),
                model.consensus.is_some()
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&raw)?);
            }
        }
        (None, Some(d)) => {
            let reg = mkv::load_models_dir(d)?;
            println!("ok: loaded {} models", reg.len());
            if json {
                let mut raws = Vec::new();
                for p in mkv::model_files(d)? {
                    raws.push(mkv::read_model_file(p)?);
                }
                println!("{}", serde_json::to_string_pretty(&raws)?);
            }
        }
        _ => {
            return Err(anyhow::anyhow!("provide --file <path> or --dir <dir>"));
        }
    }
    Ok(())
}

fn model_list(dir: &str) -> Result<()> {
    let reg = mkv::load_models_dir(dir)?;
    for (name, m) in &reg.models {
        println!(
            "{name}\tregisters={}\tmetrics={}\t{}",
            m.plan.len(),
            m.metrics.len(),
            m.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn print_table(
    defs: &[MetricDefinition],
    metrics: &BTreeMap<String, MetricValue>,
    index: &RawValueIndex,
) {
    println!(
        "{:<8} {:<32} {:<8} {:>10} {:>6} {:>6} {:<6} {:<16} {:>14} Unit",
        "Key", "Name", "Raw", "Full32", "Hi16", "Lo16", "Part", "Calc", "Value"
    );
    for def in defs {
        let Some(m) = metrics.get(&def.id) else {
            continue;
        };
        let derived = index.get(&def.key).copied().unwrap_or_default();
        println!(
            "{:<8} {:<32} {:<8} {:>10} {:>6} {:>6} {:<6} {:<16} {:>14} {}",
            def.key.to_string(),
            truncate(&def.name, 32),
            derived.raw_hex().unwrap_or_else(|| "-".into()),
            opt(derived.full32),
            opt(derived.hi16),
            opt(derived.lo16),
            def.part.to_string(),
            def.calc.as_str(),
            m.value.map(fmt_value).unwrap_or_else(|| "null".into()),
            m.unit.as_deref().unwrap_or("")
        );
    }
}

fn opt<T: ToString>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Integral values print without a fraction; others are rounded to 6 places.
fn fmt_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", (v * 1e6).round() / 1e6)
    }
}
