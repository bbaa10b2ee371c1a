use std::sync::Arc;

use prodsight_realtime::api::models::{Role, User};
use prodsight_realtime::api::ApiClient;
use prodsight_realtime::bus::event_types::INBOUND_EVENTS;
use prodsight_realtime::live::{entities, EntitySnapshot, LiveEntity};
use prodsight_realtime::{
    init_tracing, AuthSession, Notifier, RealtimeConfig, RealtimeProvider, TracingNotifier,
};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct Args {
    url: Option<String>,
    api_url: Option<String>,
    token: Option<String>,
    user_id: String,
    role: Option<String>,
    project: Option<String>,
    live: bool,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("prodsight-watch failed: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    dotenvy::dotenv().ok();
    init_tracing();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let mut config = RealtimeConfig::from_env().map_err(|e| e.to_string())?;
    if let Some(url) = args.url {
        config.server_url = url;
    }
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    config.validate().map_err(|e| e.to_string())?;

    let token = args
        .token
        .or_else(|| std::env::var("PRODSIGHT_TOKEN").ok())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| "a token is required (--token or PRODSIGHT_TOKEN)".to_string())?;
    let role: Role = match args.role.as_deref() {
        Some(name) => serde_json::from_value(json!(name)).map_err(|e| format!("invalid --role: {e}"))?,
        None => Role::Producer,
    };
    let user = User {
        id: args.user_id.clone(),
        name: args.user_id.clone(),
        role,
        email: String::new(),
        avatar: None,
        username: Some(args.user_id),
        permissions: Vec::new(),
    };

    let notifier: Arc<dyn Notifier> = Arc::new(TracingNotifier);
    let (auth_tx, auth_rx) = watch::channel(Some(AuthSession::new(user.clone(), token.clone())));
    let provider = RealtimeProvider::from_config(&config, auth_rx, notifier.clone())
        .map_err(|e| e.to_string())?;

    let _subscriptions: Vec<_> = INBOUND_EVENTS
        .iter()
        .map(|event| {
            let name = event.to_string();
            provider.subscribe(event, move |payload| {
                println!("{}", json!({ "event": name, "data": payload }));
            })
        })
        .collect();

    if let Some(project) = &args.project {
        provider.join_project_room(project);
    }
    provider.start();

    let mut watchers = Vec::new();
    if args.live {
        let api = ApiClient::new(&config.api_base_url, config.request_timeout())
            .map_err(|e| e.to_string())?
            .with_token(token);
        let source = provider.as_ref();
        watchers.push(watch_entity(entities::tasks(source, &api, &user, notifier.clone()), |tasks| {
            format!("{} tasks", tasks.len())
        }));
        watchers.push(watch_entity(entities::budget(source, &api, notifier.clone()), |budget| {
            format!("spent {:.0} of {:.0} ({:.1}%)", budget.spent, budget.total, budget.utilization())
        }));
        watchers.push(watch_entity(entities::script(source, &api, notifier.clone()), |script| {
            format!("{} scenes, {:.1} min", script.scenes.len(), script.total_duration())
        }));
        watchers.push(watch_entity(
            entities::script_metrics(source, &api, notifier.clone()),
            |metrics| format!("{} scenes, {} vfx", metrics.total_scenes, metrics.vfx_scenes),
        ));
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to listen for ctrl-c: {e}"))?;

    for watcher in watchers {
        watcher.abort();
    }
    if let Some(project) = &args.project {
        provider.leave_project_room(project);
    }
    auth_tx.send_replace(None);
    provider.stop();
    Ok(())
}

/// Print a one-line summary every time the entity's snapshot changes.
fn watch_entity<T, F>(live: LiveEntity<T>, summarize: F) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: Fn(&T) -> String + Send + 'static,
{
    tokio::spawn(async move {
        let mut rx = live.watch();
        loop {
            let line = describe(live.label(), &rx.borrow_and_update(), &summarize);
            if let Some(line) = line {
                println!("{line}");
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
}

fn describe<T>(label: &str, snapshot: &EntitySnapshot<T>, summarize: &impl Fn(&T) -> String) -> Option<String> {
    if snapshot.loading {
        return None;
    }
    if let Some(error) = &snapshot.error {
        return Some(format!("[{label}] error: {error}"));
    }
    snapshot.data.as_ref().map(|data| format!("[{label}] {}", summarize(data)))
}

fn parse_args() -> Result<Option<Args>, String> {
    let mut parsed = Args {
        user_id: "cli".to_string(),
        ..Args::default()
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| args.next().ok_or_else(|| format!("{flag} requires a value"));
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--url" => parsed.url = Some(value_for("--url")?),
            "--api-url" => parsed.api_url = Some(value_for("--api-url")?),
            "--token" => parsed.token = Some(value_for("--token")?),
            "--user" => parsed.user_id = value_for("--user")?,
            "--role" => parsed.role = Some(value_for("--role")?),
            "--project" => parsed.project = Some(value_for("--project")?),
            "--live" => parsed.live = true,
            other => return Err(format!("unknown argument '{other}' (see --help)")),
        }
    }
    Ok(Some(parsed))
}

fn print_help() {
    println!(
        "prodsight-watch: stream ProdSight realtime notifications as JSON lines

USAGE:
    prodsight-watch [OPTIONS]

OPTIONS:
    --url <URL>         Realtime server base URL (env PRODSIGHT_REALTIME_URL)
    --api-url <URL>     REST API base URL (env PRODSIGHT_API_URL)
    --token <TOKEN>     Bearer token (env PRODSIGHT_TOKEN)
    --user <ID>         User id for role-scoped task fetches (default: cli)
    --role <ROLE>       User role, e.g. Producer, Crew, VFX (default: Producer)
    --project <ID>      Join this project's room
    --live              Also keep tasks, budget and script caches live and print summaries
    -h, --help          Show this help"
    );
}
