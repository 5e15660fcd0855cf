use std::env;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use rand::Rng;
use tracing_subscriber::EnvFilter;

use bagdb::{Config, Error, Interrupt, Result, Store};

const DEFAULT_TEST_KEYS: usize = 10_000;
const DEFAULT_TEST_VALUES: usize = 100_000;
const PROGRESS_EVERY: usize = 1_000_000;

fn exe_name() -> String {
    env::args()
        .next()
        .as_deref()
        .and_then(|a| a.rsplit('/').next().map(str::to_string))
        .unwrap_or_else(|| "bagdb".to_string())
}

fn print_usage() {
    eprintln!("Usage: {} (read|write|test) [options]", exe_name());
    eprintln!("  --config PATH   config file (default: {}.config)", exe_name());
    eprintln!("  read  --key K   print all values stored under K");
    eprintln!("  read  --keys    print all keys");
    eprintln!("  write           read key<TAB>value lines from stdin");
    eprintln!("  test  --keys N --values M   synthetic load");
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return ExitCode::FAILURE;
    }

    let interrupt = Interrupt::new();
    spawn_interrupt_handler(interrupt.clone());

    let result = match args[1].as_str() {
        "read" => cmd_read(&args[2..], &interrupt).await,
        "write" => cmd_write(&args[2..], &interrupt).await,
        "test" => cmd_test(&args[2..], &interrupt).await,
        _ => {
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

/// First interrupt raises the cancellation token so the store can drain;
/// a second one gives up immediately.
fn spawn_interrupt_handler(interrupt: Interrupt) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if interrupt.is_triggered() {
                std::process::exit(1);
            }
            interrupt.trigger();
        }
    });
}

fn required(value: Option<&String>, flag: &str) -> Result<String> {
    value.cloned().ok_or_else(|| {
        print_usage();
        Error::Io(format!("missing value for {flag}"))
    })
}

fn unknown_flag(flag: &str) -> Error {
    print_usage();
    Error::Io(format!("unknown flag: {flag}"))
}

fn load_config(path: &str) -> Result<Config> {
    let file =
        std::fs::File::open(path).map_err(|e| Error::Io(format!("configuration {path}: {e}")))?;
    serde_json::from_reader(file).map_err(|e| Error::Io(format!("configuration {path}: {e}")))
}

async fn cmd_read(args: &[String], interrupt: &Interrupt) -> Result<()> {
    let mut config_path = format!("{}.config", exe_name());
    let mut key = None;
    let mut all_keys = false;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config_path = required(it.next(), "--config")?,
            "--key" => key = Some(required(it.next(), "--key")?),
            "--keys" => all_keys = true,
            other => return Err(unknown_flag(other)),
        }
    }

    let store = Store::new(load_config(&config_path)?, interrupt.clone());
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if all_keys {
        store.find_keys(|k| {
            let _ = writeln!(out, "{k}");
        })
    } else {
        let key = key.unwrap_or_default();
        store.find_values(&key, |v| {
            let _ = writeln!(out, "{v}");
        })
    }
}

async fn cmd_write(args: &[String], interrupt: &Interrupt) -> Result<()> {
    let mut config_path = format!("{}.config", exe_name());

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config_path = required(it.next(), "--config")?,
            other => return Err(unknown_flag(other)),
        }
    }

    let mut store = Store::new(load_config(&config_path)?, interrupt.clone());

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some((key, value)) = line.split_once('\t') else {
            tracing::warn!("key without value, ignored");
            continue;
        };
        if let Err(e) = store.add_value(key, value).await {
            return drain_on_interrupt(&mut store, e).await;
        }
    }

    store.flush(true).await
}

async fn cmd_test(args: &[String], interrupt: &Interrupt) -> Result<()> {
    let mut config_path = format!("{}.config", exe_name());
    let mut num_keys = DEFAULT_TEST_KEYS;
    let mut num_values = DEFAULT_TEST_VALUES;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => config_path = required(it.next(), "--config")?,
            "--keys" => {
                num_keys = required(it.next(), "--keys")?
                    .parse()
                    .map_err(|e| Error::Io(format!("--keys: {e}")))?
            }
            "--values" => {
                num_values = required(it.next(), "--values")?
                    .parse()
                    .map_err(|e| Error::Io(format!("--values: {e}")))?
            }
            other => return Err(unknown_flag(other)),
        }
    }

    let mut store = Store::new(load_config(&config_path)?, interrupt.clone());
    if num_keys == 0 {
        return store.flush(true).await;
    }

    let mut rng = rand::thread_rng();

    tracing::info!(keys = num_keys, "started to generate random keys");
    let keys: Vec<String> = (0..num_keys)
        .map(|_| {
            let len = rng.gen_range(1..=32);
            random_string(&mut rng, len)
        })
        .collect();

    tracing::info!(values = num_values, "started to insert values");
    for i in 0..num_values {
        let key = &keys[norm_index(&mut rng, num_keys)];
        let len = rng.gen_range(1..=64);
        let value = random_string(&mut rng, len);

        if let Err(e) = store.add_value(key, &value).await {
            return drain_on_interrupt(&mut store, e).await;
        }

        if i != 0 && i % PROGRESS_EVERY == 0 {
            tracing::info!(inserted = i, "insertion progress");
        }
    }

    store.flush(true).await
}

/// On interruption, drain what the store already accepted before bailing
/// out; any other error is returned as-is.
async fn drain_on_interrupt(store: &mut Store, err: Error) -> Result<()> {
    if err == Error::Interrupted {
        store.flush(true).await?;
    }
    Err(err)
}

fn random_string(rng: &mut impl Rng, len: usize) -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    (0..len)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect()
}

/// Index with a centered, roughly normal distribution over `0..size`.
fn norm_index(rng: &mut impl Rng, size: usize) -> usize {
    let x: f64 = (0..4).map(|_| rng.gen::<f64>()).sum::<f64>() / 4.0;
    ((x * size as f64) as usize).min(size - 1)
}
