use std::{path::Path, process, sync::Arc};

use arabica::{
    application::{
        error::AppError,
        export,
        feed::{FeedRegistry, FeedService},
        manage::ManageService,
        repos::{RecordRepo, Session},
    },
    cache::{CacheConfig, SessionCache, spawn_sweeper},
    config::{self, Command, ParamsArgs, Settings},
    domain::{
        entities::{Bean, Brew, Brewer, Grinder, Roaster},
        types::Collection,
    },
    infra::{
        atproto::{
            Credentials, PublicClient, StaticSessionAuth, XrpcClient, client::http_client,
            store::AtprotoStore, uri,
        },
        error::InfraError,
        telemetry,
    },
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

/// Run `$body` with `$entity` bound to the entity type stored in `$collection`.
macro_rules! for_collection {
    ($collection:expr, $entity:ident => $body:expr) => {
        match $collection {
            Collection::Beans => {
                type $entity = Bean;
                $body
            }
            Collection::Roasters => {
                type $entity = Roaster;
                $body
            }
            Collection::Grinders => {
                type $entity = Grinder;
                $body
            }
            Collection::Brewers => {
                type $entity = Brewer;
                $body
            }
            Collection::Brews => {
                type $entity = Brew;
                $body
            }
        }
    };
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let summary = error.report().summary();
    if dispatcher::has_been_set() {
        error!(error = %summary, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %summary, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match cli_args.command {
        Command::Resolve(args) => {
            let locator = uri::resolve(&args.locator)?;
            print_json(&locator)
        }
        Command::Feed(args) => run_feed(&settings, args.limit).await,
        command => run_repository(&settings, command).await,
    }
}

async fn run_feed(settings: &Settings, limit: Option<usize>) -> Result<(), AppError> {
    let http = http_client(settings.http.timeout, &settings.http.user_agent)
        .map_err(InfraError::from)?;
    let public = PublicClient::new(
        http,
        settings.feed.public_api_url.clone(),
        settings.feed.plc_directory_url.clone(),
    );
    let registry = FeedRegistry::with_dids(settings.feed.dids.iter().cloned())?;
    let feed = FeedService::new(Arc::new(registry), Arc::new(public));

    let limit = limit.unwrap_or(settings.feed.limit.get() as usize);
    let items = feed.recent(limit).await;
    info!(
        target = "arabica::feed",
        users = feed.registry().len(),
        items = items.len(),
        "feed assembled"
    );
    print_json(&items)
}

async fn run_repository(settings: &Settings, command: Command) -> Result<(), AppError> {
    let target = settings.repository.require()?;
    let http = http_client(settings.http.timeout, &settings.http.user_agent)
        .map_err(InfraError::from)?;

    let session = Session::new(target.did.clone(), target.session_id.clone());
    let auth = StaticSessionAuth::new(
        target.session_id,
        Credentials {
            pds_url: target.pds_url,
            access_token: target.access_token,
        },
    );
    let repo: Arc<dyn RecordRepo> = Arc::new(XrpcClient::new(http, Arc::new(auth)));
    let cache = Arc::new(SessionCache::new(CacheConfig::from(&settings.cache)));
    let sweeper = spawn_sweeper(Arc::clone(&cache));

    let store = AtprotoStore::new(repo, cache, session);
    let result = dispatch(&store, command).await;

    sweeper.shutdown().await;
    result
}

async fn dispatch(store: &AtprotoStore, command: Command) -> Result<(), AppError> {
    match command {
        Command::List(args) => for_collection!(args.collection, E => {
            print_json(&store.list::<E>().await?)
        }),
        Command::Get(args) => for_collection!(args.collection, E => {
            print_json(&store.get::<E>(&args.rkey).await?)
        }),
        Command::Create(args) => {
            let raw = read_params(&args.params).await?;
            for_collection!(args.collection, E => {
                let params = serde_json::from_str(&raw).map_err(|err| {
                    AppError::validation(format!("invalid {} parameters: {err}", args.collection))
                })?;
                print_json(&store.create::<E>(&params).await?)
            })
        }
        Command::Update(args) => {
            let raw = read_params(&args.params).await?;
            for_collection!(args.collection, E => {
                let params = serde_json::from_str(&raw).map_err(|err| {
                    AppError::validation(format!("invalid {} parameters: {err}", args.collection))
                })?;
                store.update::<E>(&args.rkey, &params).await?
            });
            info!(
                target = "arabica::update",
                collection = %args.collection,
                rkey = %args.rkey,
                "record updated"
            );
            Ok(())
        }
        Command::Delete(args) => {
            for_collection!(args.collection, E => store.delete::<E>(&args.rkey).await?);
            info!(
                target = "arabica::delete",
                collection = %args.collection,
                rkey = %args.rkey,
                "record deleted"
            );
            Ok(())
        }
        Command::Manage => {
            let manage = ManageService::new(store.clone());
            print_json(&manage.load_manage().await?)
        }
        Command::Export(args) => {
            let manage = ManageService::new(store.clone());
            export::export_journal(&manage, &store.session().owner, &args.file).await?;
            Ok(())
        }
        Command::Feed(_) | Command::Resolve(_) => Err(AppError::unexpected(
            "command does not use the authenticated repository",
        )),
    }
}

async fn read_params(args: &ParamsArgs) -> Result<String, AppError> {
    match (&args.data, &args.file) {
        (Some(data), _) => Ok(data.clone()),
        (None, Some(path)) => read_file(path).await,
        (None, None) => Err(AppError::validation("either --data or --file is required")),
    }
}

async fn read_file(path: &Path) -> Result<String, AppError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value).map_err(|err| {
        AppError::from(InfraError::serialization(format!(
            "failed to render output: {err}"
        )))
    })?;
    println!("{out}");
    Ok(())
}
