use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use studiobook::compactor;
use studiobook::config::Config;
use studiobook::engine::{now_ms, AdmissionRequest, Engine, EngineError, EngineOptions, ReservationPatch};
use studiobook::filters::{ReservationScope, StudioFilter};
use studiobook::model::{Ms, Place, Studio};
use studiobook::observability;
use studiobook::validation::parse_timestamp;

/// One request per stdin line. Timestamps are RFC 3339 strings.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    CreatePlace {
        place: Place,
    },
    CreateStudio {
        studio: Studio,
    },
    UpdateStudio {
        studio: Studio,
    },
    Admit {
        user_id: Ulid,
        studio_id: Ulid,
        option_id: Option<Ulid>,
        coupon_id: Option<Ulid>,
        start_time: Option<String>,
        end_time: Option<String>,
        now: Option<String>,
    },
    Update {
        id: Ulid,
        option_id: Option<Ulid>,
        coupon_id: Option<Ulid>,
        start_time: Option<String>,
        end_time: Option<String>,
        now: Option<String>,
    },
    Revalidate {
        id: Ulid,
        now: Option<String>,
    },
    Pay {
        id: Ulid,
    },
    Cancel {
        id: Ulid,
    },
    Get {
        id: Ulid,
    },
    List {
        studio_id: Ulid,
        #[serde(default)]
        scope: ReservationScope,
    },
    UserReservations {
        user_id: Ulid,
    },
    Search {
        #[serde(default)]
        filter: StudioFilter,
    },
    Price {
        id: Ulid,
    },
    Compact,
}

fn timestamp(raw: Option<&str>) -> Option<Ms> {
    raw.and_then(parse_timestamp)
}

/// The caller's clock if given, else ours. A clock that does not parse is refused.
fn current_time(raw: Option<&str>) -> Result<Ms, EngineError> {
    match raw {
        None => Ok(now_ms()),
        Some(raw) => parse_timestamp(raw).ok_or(EngineError::Invalid("now is not an RFC 3339 timestamp")),
    }
}

fn error_body(e: &EngineError) -> Value {
    match e {
        EngineError::Validation(v) => json!({
            "kind": v.kind,
            "field": v.field,
            "message": v.message,
            "retryable": false,
        }),
        other => json!({
            "kind": "engine",
            "message": other.to_string(),
            "retryable": other.is_retryable(),
        }),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Storage(e.to_string()))
}

async fn dispatch(engine: &Engine, cmd: Command) -> Result<Value, EngineError> {
    match cmd {
        Command::CreatePlace { place } => {
            let id = place.id;
            engine.create_place(place).await?;
            Ok(json!({ "id": id }))
        }
        Command::CreateStudio { studio } => {
            let id = studio.id;
            engine.create_studio(studio).await?;
            Ok(json!({ "id": id }))
        }
        Command::UpdateStudio { studio } => {
            let id = studio.id;
            engine.update_studio(studio).await?;
            Ok(json!({ "id": id }))
        }
        Command::Admit {
            user_id,
            studio_id,
            option_id,
            coupon_id,
            start_time,
            end_time,
            now,
        } => {
            let req = AdmissionRequest {
                user_id,
                studio_id,
                option_id,
                coupon_id,
                start_time: timestamp(start_time.as_deref()),
                end_time: timestamp(end_time.as_deref()),
                now: current_time(now.as_deref())?,
            };
            to_value(engine.admit(req).await?)
        }
        Command::Update {
            id,
            option_id,
            coupon_id,
            start_time,
            end_time,
            now,
        } => {
            let patch = ReservationPatch {
                option_id: option_id.map(Some),
                coupon_id: coupon_id.map(Some),
                start_time: timestamp(start_time.as_deref()),
                end_time: timestamp(end_time.as_deref()),
            };
            to_value(engine.update_reservation(id, patch, current_time(now.as_deref())?).await?)
        }
        Command::Revalidate { id, now } => {
            to_value(engine.revalidate(id, current_time(now.as_deref())?).await?)
        }
        Command::Pay { id } => to_value(engine.confirm_payment(id).await?),
        Command::Cancel { id } => to_value(engine.cancel_reservation(id).await?),
        Command::Get { id } => to_value(engine.get_reservation(id).await?),
        Command::List { studio_id, scope } => {
            to_value(engine.list_reservations(studio_id, scope).await?)
        }
        Command::UserReservations { user_id } => {
            to_value(engine.user_reservations(user_id).await?)
        }
        Command::Search { filter } => to_value(engine.search_studios(&filter).await?),
        Command::Price { id } => to_value(engine.pricing_snapshot(id).await?),
        Command::Compact => {
            engine.compact_wal().await?;
            Ok(json!({ "compacted": true }))
        }
    }
}

async fn handle_line(engine: &Engine, line: &str) -> Value {
    let cmd: Command = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            return json!({ "error": { "kind": "parse", "message": e.to_string(), "retryable": false } });
        }
    };
    match dispatch(engine, cmd).await {
        Ok(value) => json!({ "ok": value }),
        Err(e) => json!({ "error": error_body(&e) }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::open(config.wal_path(), EngineOptions::from(&config))?);
    info!("studiobook ready");
    info!("  wal: {}", config.wal_path().display());
    info!("  overlap scope: {:?}", config.overlap_scope);
    info!("  lock timeout: {:?}", config.lock_timeout);

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold).await;
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let response = handle_line(&engine, &line).await;
                stdout.write_all(response.to_string().as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!("studiobook stopped");
    Ok(())
}
