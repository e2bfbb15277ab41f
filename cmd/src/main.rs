/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

mod error;

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use alert_state::{
    config::{DEFAULT_ANNOTATION_QUEUE_SIZE, DEFAULT_IMAGE_TIMEOUT, DEFAULT_RESEND_DELAY},
    memory::{MemoryAnnotations, MemoryDashboards, MemoryStore, StaticImageService},
    AlertInstance, AlertRule, AnnotationItem, DisabledImageService, EvalResult, EvalState,
    ImageService, Labels, Manager, ManagerConfig, OrgId, RuleKey, RuleUid, Services, State,
    StateMetrics,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use error::{Error, Result};

/// Run the alert state engine on files.
#[derive(clap::Parser)]
struct Args {
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, value_enum, default_value = "yaml")]
    format: Format,
    /// Minimum delay between notifications for an instance, in seconds.
    #[clap(long, env = "ALERT_STATE_RESEND_DELAY", default_value_t = DEFAULT_RESEND_DELAY.as_secs())]
    resend_delay: u64,
    /// Maximum time to wait for an image, in seconds.
    #[clap(long, env = "ALERT_STATE_IMAGE_TIMEOUT", default_value_t = DEFAULT_IMAGE_TIMEOUT.as_secs())]
    image_timeout: u64,
    #[clap(long, env = "ALERT_STATE_ANNOTATION_QUEUE_SIZE", default_value_t = DEFAULT_ANNOTATION_QUEUE_SIZE)]
    annotation_queue_size: usize,
    #[clap(long, help = "Attach placeholder images to alerting instances")]
    images: bool,
}

#[derive(clap::Subcommand)]
enum Command {
    Warm(WarmArgs),
    Replay(ReplayArgs),
}

/// Rebuild the state cache from persisted alert instances.
#[derive(clap::Args)]
struct WarmArgs {
    /// Alert rules (yaml or json).
    rules: PathBuf,
    /// Persisted alert instances (yaml or json).
    instances: PathBuf,
}

/// Replay evaluation results through the state manager.
#[derive(clap::Args)]
struct ReplayArgs {
    /// The scenario (yaml or json).
    scenario: PathBuf,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum Format {
    Json,
    Yaml,
}

#[derive(Deserialize)]
struct Scenario {
    rules: Vec<AlertRule>,
    #[serde(default)]
    instances: Vec<AlertInstance>,
    #[serde(default)]
    dashboards: Vec<Dashboard>,
    #[serde(default)]
    folder: String,
    evaluations: Vec<Evaluation>,
}

#[derive(Deserialize)]
struct Dashboard {
    org_id: OrgId,
    uid: String,
    id: i64,
}

#[derive(Deserialize)]
struct Evaluation {
    org_id: OrgId,
    rule_uid: RuleUid,
    evaluated_at: DateTime<Utc>,
    #[serde(default)]
    results: Vec<ScenarioResult>,
}

#[derive(Deserialize)]
struct ScenarioResult {
    #[serde(default)]
    instance: Labels,
    state: EvalState,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    values: BTreeMap<String, Option<f64>>,
}

#[derive(Serialize)]
struct WarmOutput {
    states: Vec<State>,
}

#[derive(Serialize)]
struct ReplayOutput {
    evaluations: Vec<EvaluationOutput>,
    states: Vec<State>,
    instances: Vec<AlertInstance>,
    annotations: Vec<AnnotationItem>,
}

#[derive(Serialize)]
struct EvaluationOutput {
    org_id: OrgId,
    rule_uid: RuleUid,
    evaluated_at: DateTime<Utc>,
    states: Vec<State>,
}

struct Engine {
    manager: Manager,
    store: Arc<MemoryStore>,
    annotations: Arc<MemoryAnnotations>,
    org_ids: BTreeSet<OrgId>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let res = match &args.cmd {
        Command::Warm(cmd) => warm(&args, cmd).await,
        Command::Replay(cmd) => replay(&args, cmd).await,
    };

    if let Err(e) = res {
        eprintln!("Error: {e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn warm(args: &Args, cmd: &WarmArgs) -> Result<()> {
    let rules = load::<Vec<AlertRule>>(&cmd.rules)?;
    let instances = load::<Vec<AlertInstance>>(&cmd.instances)?;
    let engine = engine(args, rules, instances, &[])?;

    engine.manager.warm().await;
    let states = engine.states();
    engine.manager.close().await;

    output(args.format, &WarmOutput { states })
}

async fn replay(args: &Args, cmd: &ReplayArgs) -> Result<()> {
    let scenario = load::<Scenario>(&cmd.scenario)?;
    let rules = scenario
        .rules
        .iter()
        .map(|rule| (rule.key(), rule.clone()))
        .collect::<BTreeMap<_, _>>();
    let engine = engine(
        args,
        scenario.rules,
        scenario.instances,
        &scenario.dashboards,
    )?;

    engine.manager.warm().await;
    let evaluations = run_evaluations(
        &engine.manager,
        &rules,
        &scenario.folder,
        scenario.evaluations,
    )
    .await;
    let states = engine.states();
    engine.manager.close().await;

    output(
        args.format,
        &ReplayOutput {
            evaluations: evaluations?,
            states,
            instances: engine.store.instances(),
            annotations: engine.annotations.items(),
        },
    )
}

async fn run_evaluations(
    manager: &Manager,
    rules: &BTreeMap<RuleKey, AlertRule>,
    folder: &str,
    evaluations: Vec<Evaluation>,
) -> Result<Vec<EvaluationOutput>> {
    let mut outputs = Vec::with_capacity(evaluations.len());
    for evaluation in evaluations {
        let key = RuleKey::new(evaluation.org_id, evaluation.rule_uid.clone());
        let rule = rules
            .get(&key)
            .ok_or_else(|| Error::MissingRule(evaluation.org_id, evaluation.rule_uid.clone()))?;
        let results = evaluation
            .results
            .into_iter()
            .map(|result| result.into_eval_result(evaluation.evaluated_at))
            .collect::<Vec<_>>();
        let states = manager
            .process_eval_results(
                evaluation.evaluated_at,
                rule,
                &results,
                &rule.scheduler_labels(folder),
            )
            .await;
        log::info!(
            "processed {} results for {key} at {}: {} states",
            results.len(),
            evaluation.evaluated_at,
            states.len()
        );
        outputs.push(EvaluationOutput {
            org_id: evaluation.org_id,
            rule_uid: evaluation.rule_uid,
            evaluated_at: evaluation.evaluated_at,
            states,
        });
    }
    Ok(outputs)
}

fn engine(
    args: &Args,
    rules: Vec<AlertRule>,
    instances: Vec<AlertInstance>,
    dashboards: &[Dashboard],
) -> Result<Engine> {
    let store = Arc::new(MemoryStore::new());
    let annotations = Arc::new(MemoryAnnotations::new());
    let dashboard_service = Arc::new(MemoryDashboards::new());
    let images: Arc<dyn ImageService> = match args.images {
        true => Arc::new(StaticImageService::new()),
        false => Arc::new(DisabledImageService),
    };

    let org_ids = rules
        .iter()
        .map(|rule| rule.org_id)
        .chain(instances.iter().map(|instance| instance.org_id))
        .collect();
    rules.into_iter().for_each(|rule| store.add_rule(rule));
    instances
        .into_iter()
        .for_each(|instance| store.add_instance(instance));
    dashboards
        .iter()
        .for_each(|d| dashboard_service.add(d.org_id, d.uid.as_str(), d.id));

    let config = ManagerConfig {
        resend_delay: Duration::from_secs(args.resend_delay),
        image_timeout: Duration::from_secs(args.image_timeout),
        annotation_queue_size: args.annotation_queue_size,
        ..ManagerConfig::default()
    };
    let metrics = StateMetrics::new(&prometheus::Registry::new())?;
    let services = Services::memory(store.clone(), images, annotations.clone(), dashboard_service);

    Ok(Engine {
        manager: Manager::new(config, services, metrics),
        store,
        annotations,
        org_ids,
    })
}

impl Engine {
    fn states(&self) -> Vec<State> {
        self.org_ids
            .iter()
            .flat_map(|org_id| self.manager.get_all(*org_id))
            .collect()
    }
}

impl ScenarioResult {
    fn into_eval_result(self, evaluated_at: DateTime<Utc>) -> EvalResult {
        EvalResult {
            error: self.error,
            values: self.values,
            ..EvalResult::new(self.instance, self.state, evaluated_at)
        }
    }
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::Read(path.to_path_buf(), e))?;
    serde_yaml::from_str(&data).map_err(|e| Error::Decode(path.to_path_buf(), e))
}

fn output<T: Serialize>(format: Format, value: &T) -> Result<()> {
    match format {
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(value).map_err(Error::EncodeJson)?
        ),
        Format::Yaml => print!(
            "{}",
            serde_yaml::to_string(value).map_err(Error::EncodeYaml)?
        ),
    }
    Ok(())
}
