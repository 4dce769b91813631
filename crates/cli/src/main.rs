use anyhow::Context;
use clap::Parser;
use polyglot_core::cache::TranslationCache;
use polyglot_core::config::{
    resolve_api_key, resolve_optional_string, resolve_string_with_default, AppConfig,
    EngineConfig, Env, LanguageCode, ProviderConfig, StdEnv, DEFAULT_DAILY_LIMIT,
    DEFAULT_ENDPOINT, DEFAULT_UNIT_TIMEOUT_SECS, ENV_API_KEY, ENV_ENDPOINT, ENV_GLOSS_ENDPOINT,
};
use polyglot_core::orchestrator::{BatchSnapshot, Orchestrator, UnitStatusKind};
use polyglot_core::sinks::{DailyUsageGate, MemoryHistory};
use polyglot_core::translate::{DummyTranslator, HttpTranslator, Translator};
use polyglot_core::util::SystemClock;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "polyglot")]
#[command(about = "Translate a phrase into several languages at once")]
struct Args {
    #[arg(long)]
    text: String,

    #[arg(long, default_value = "en")]
    source: String,

    /// Comma-separated target languages, e.g. `ko,ja,fr`.
    #[arg(long, value_delimiter = ',', required = true)]
    targets: Vec<String>,

    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    gloss_endpoint: Option<String>,

    #[arg(long, default_value_t = DEFAULT_UNIT_TIMEOUT_SECS)]
    timeout_secs: u64,

    #[arg(long)]
    daily_limit: Option<u32>,

    /// Use the built-in offline translator instead of the HTTP provider.
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Retry failed or timed-out languages until their retries run out.
    #[arg(long, default_value_t = false)]
    auto_retry: bool,

    #[arg(long, default_value_t = false)]
    json: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let auto_retry = args.auto_retry;
    let json = args.json;
    let env = StdEnv;
    let cfg = build_config(args, &env)?;

    tracing::info!(
        source_lang = %cfg.source,
        targets = cfg.targets.len(),
        offline = cfg.offline,
        "config loaded"
    );

    if cfg.offline {
        run_batch(cfg, DummyTranslator::new(), auto_retry, json).await
    } else {
        let translator = HttpTranslator::new(&cfg.provider)
            .context("invalid translation provider configuration")?;
        run_batch(cfg, translator, auto_retry, json).await
    }
}

async fn run_batch<T>(cfg: AppConfig, translator: T, auto_retry: bool, json: bool) -> anyhow::Result<()>
where
    T: Translator + Clone + 'static,
{
    let cache = Arc::new(TranslationCache::with_system_clock(cfg.engine.cache_ttl));
    let gate = Arc::new(DailyUsageGate::new(
        cfg.daily_limit.unwrap_or(DEFAULT_DAILY_LIMIT),
        Arc::new(SystemClock),
    ));
    let history = Arc::new(MemoryHistory::new(cfg.engine.history_capacity));
    let orchestrator = Orchestrator::new(translator, cache, gate, history.clone(), cfg.engine);

    let mut handle = orchestrator
        .start_batch(&cfg.text, &cfg.source, &cfg.targets)
        .context("could not start translation")?;

    let mut seen: Vec<Option<(UnitStatusKind, u32)>> = Vec::new();
    let mut snapshot = handle.snapshot();
    loop {
        if !json {
            report(&snapshot, &mut seen);
        }
        if auto_retry {
            for unit in snapshot.units.iter().filter(|u| u.can_retry) {
                if let Err(e) = handle.retry(unit.index).await {
                    tracing::warn!(target_lang = %unit.target_language, error = %e, "retry refused");
                }
            }
        }
        if is_finished(&snapshot, auto_retry) {
            break;
        }
        match handle.changed().await {
            Some(next) => snapshot = next,
            None => break,
        }
    }

    if json {
        let out = serde_json::json!({
            "batch": snapshot,
            "history": history.records(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if let Some(record) = history.records().first() {
        println!("saved to history: {}", record.translated_text);
    }

    Ok(())
}

fn is_finished(snapshot: &BatchSnapshot, auto_retry: bool) -> bool {
    if snapshot.cancelled {
        return true;
    }
    let pending_retry = auto_retry && snapshot.units.iter().any(|u| u.can_retry);
    snapshot.complete && snapshot.all_settled() && !pending_retry
}

/// Prints each unit once per settled state it reaches.
fn report(snapshot: &BatchSnapshot, seen: &mut Vec<Option<(UnitStatusKind, u32)>>) {
    seen.resize(snapshot.units.len(), None);
    for unit in &snapshot.units {
        let state = (unit.status, unit.retry_count);
        if seen[unit.index] == Some(state) {
            continue;
        }
        seen[unit.index] = Some(state);

        let lang = unit.target_language.as_str();
        let hint = if unit.retries_exhausted {
            " (maximum retries reached)"
        } else if unit.can_retry {
            " (retry available)"
        } else {
            ""
        };
        match unit.status {
            UnitStatusKind::Success => {
                if let Some(result) = &snapshot.results[unit.index] {
                    println!("{lang}: {}", result.translated_text);
                    for meaning in &result.meanings {
                        println!("    {}: {}", meaning.part_of_speech, meaning.translation);
                    }
                }
            }
            UnitStatusKind::Error => {
                let message = unit.error.as_deref().unwrap_or("unknown error");
                println!("{lang}: error: {message}{hint}");
            }
            UnitStatusKind::Timeout => println!("{lang}: timed out{hint}"),
            UnitStatusKind::Loading | UnitStatusKind::Retrying | UnitStatusKind::Cancelled => {}
        }
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn build_config(args: Args, env: &impl Env) -> anyhow::Result<AppConfig> {
    let source = LanguageCode::new(args.source)?;
    let targets = args
        .targets
        .into_iter()
        .map(LanguageCode::new)
        .collect::<Result<Vec<_>, _>>()?;

    let provider = ProviderConfig {
        endpoint: resolve_string_with_default(args.endpoint, ENV_ENDPOINT, env, DEFAULT_ENDPOINT),
        gloss_endpoint: resolve_optional_string(args.gloss_endpoint, ENV_GLOSS_ENDPOINT, env),
        api_key: resolve_api_key(args.api_key, ENV_API_KEY, env)?,
    };
    let engine =
        EngineConfig::default().with_unit_timeout(Duration::from_secs(args.timeout_secs))?;

    Ok(AppConfig {
        text: args.text,
        source,
        targets,
        provider,
        engine,
        daily_limit: args.daily_limit,
        offline: args.offline,
    })
}
