use clap::Parser;
use envconfig::Envconfig;
use nimbus_db::{NimbusError, Node, NodeArgs, NodeConfig, observability::setup_tracing};
use nimbus_transport::ZenohConfig;
use tracing::{debug, error, info};

fn main() {
    let args = NodeArgs::parse();
    let cpus = num_cpus::get();
    let worker_threads = std::cmp::max(1, cpus);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = runtime.block_on(run(args, worker_threads));
    if let Err(e) = result {
        error!("{}", e);
        eprintln!("nimbus-db: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: NodeArgs, worker_threads: usize) -> Result<(), NimbusError> {
    let conf = NodeConfig::load(Some(&args.config))?;
    setup_tracing(&conf.log_level, conf.log_format)?;
    info!(
        "starting NimbusDb {} in {} mode with {} worker threads",
        env!("CARGO_PKG_VERSION"),
        args.mode,
        worker_threads
    );
    start(conf, args).await
}

async fn start(conf: NodeConfig, args: NodeArgs) -> Result<(), NimbusError> {
    debug!("use node config: {:?}", conf);
    let zenoh = ZenohConfig::init_from_env()
        .map_err(|e| NimbusError::Bus(nimbus_transport::BusError::Config(e.to_string())))?;
    let node = Node::start(conf, args.mode, &zenoh).await?;

    shutdown_signal().await;
    info!("starting a clean up for shutdown");
    node.shutdown().await;
    info!("bye bye!");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("unable to listen for shutdown signal: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("unable to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
