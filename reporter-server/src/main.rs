//! 超声报告服务器主程序

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use reporter_admin::{init_logging, ConfigValidator, ReporterConfig, SystemMonitor, DEFAULT_CONFIG_PATH};
use reporter_core::NewUser;
use reporter_database::{DatabasePool, MemoryStore, PgStore, PoolSettings, Repositories};
use reporter_integration::{
    GoogleEndpoints, GoogleWorkspaceClient, OAuthClient, OAuthSettings, DEFAULT_SCOPES,
};
use reporter_web::{AppState, AuthService, ServerOptions, WebServer};
use reporter_workflow::{DocumentWorkflow, DriveFolders, OutboxSettings, OutboxWorker};
use tracing::{info, warn};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "reporter-server")]
#[command(about = "超声报告系统服务器")]
struct Cli {
    /// 配置文件路径（不含扩展名）
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动 HTTP 服务
    Serve(ServeArgs),
    /// 创建数据库表与索引
    Migrate,
    /// 创建员工用户
    CreateUser(CreateUserArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// 监听地址
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// 使用内存存储（开发模式，数据不持久化）
    #[arg(long)]
    in_memory: bool,
}

#[derive(Args, Debug)]
struct CreateUserArgs {
    #[arg(long)]
    username: String,

    #[arg(long, env = "REPORTER_USER_PASSWORD")]
    password: String,

    #[arg(long)]
    first_name: String,

    #[arg(long)]
    last_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ReporterConfig::load(&cli.config)?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Command::Serve(args) = &cli.command {
        if let Some(host) = &args.host {
            config.server.host = host.clone();
        }
        if let Some(port) = args.port {
            config.server.port = port;
        }
    }

    init_logging(&config.logging)?;
    ConfigValidator::new().validate(&config)?;

    match cli.command {
        Command::Serve(args) => serve(config, args.in_memory).await,
        Command::Migrate => migrate(&config).await,
        Command::CreateUser(args) => create_user(&config, args).await,
    }
}

async fn connect(config: &ReporterConfig) -> anyhow::Result<PgStore> {
    let pool = DatabasePool::connect(&PoolSettings {
        url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        min_connections: config.database.min_connections,
        connect_timeout: Duration::from_secs(config.database.connect_timeout_secs),
    })
    .await
    .context("Failed to connect to database")?;

    let store = PgStore::new(pool);
    store.create_tables().await?;
    Ok(store)
}

async fn migrate(config: &ReporterConfig) -> anyhow::Result<()> {
    let store = connect(config).await?;
    store.pool().close().await;
    info!("Database migration completed");
    Ok(())
}

async fn create_user(config: &ReporterConfig, args: CreateUserArgs) -> anyhow::Result<()> {
    let store = Arc::new(connect(config).await?);
    let repos = Repositories::from_backend(store.clone());

    let user = NewUser {
        first_name: args.first_name,
        last_name: args.last_name,
        username: args.username,
        password: args.password,
    }
    .into_user()?;
    let user = repos.users.create_user(user).await?;

    info!(id = %user.id, username = %user.username, "User created");
    store.pool().close().await;
    Ok(())
}

async fn serve(config: ReporterConfig, in_memory: bool) -> anyhow::Result<()> {
    info!("Starting reporter server...");

    let repos = if in_memory {
        warn!("Using in-memory storage, data will be lost on shutdown");
        Repositories::from_backend(Arc::new(MemoryStore::new()))
    } else {
        Repositories::from_backend(Arc::new(connect(&config).await?))
    };

    let monitor = Arc::new(SystemMonitor::new()?);
    let http = GoogleWorkspaceClient::http_client(config.request_timeout())?;
    let google = &config.google;
    let oauth = OAuthClient::new(
        http.clone(),
        OAuthSettings {
            client_id: google.client_id.clone(),
            client_secret: google.client_secret.clone(),
            redirect_uri: google.redirect_uri.clone(),
            auth_url: google.oauth_auth_url.clone(),
            token_url: google.oauth_token_url.clone(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        },
    );
    let documents = Arc::new(GoogleWorkspaceClient::new(
        http,
        GoogleEndpoints {
            drive_api_base: google.drive_api_base.clone(),
            docs_api_base: google.docs_api_base.clone(),
        },
        oauth.clone(),
        repos.credentials.clone(),
    ));

    // 发件箱后台任务
    let outbox_monitor = monitor.clone();
    let worker = OutboxWorker::new(
        repos.outbox.clone(),
        documents.clone(),
        OutboxSettings {
            poll_interval: Duration::from_secs(config.outbox.poll_interval_secs),
            max_attempts: config.outbox.max_attempts,
            base_backoff: Duration::from_secs(config.outbox.base_backoff_secs),
            max_backoff: Duration::from_secs(config.outbox.max_backoff_secs),
            batch_size: config.outbox.batch_size,
        },
    )
    .with_observer(move |stats| {
        outbox_monitor.record_outbox_run(stats.completed, stats.rescheduled, stats.failed)
    });
    let waker = worker.waker();
    worker.spawn();

    let workflow = DocumentWorkflow::new(
        documents,
        repos.clone(),
        DriveFolders {
            templates: google.templates_folder_id.clone(),
            deleted_templates: google.deleted_templates_folder_id.clone(),
            reports: google.reports_folder_id.clone(),
            deleted_reports: google.deleted_reports_folder_id.clone(),
        },
        waker,
    );
    let auth = AuthService::new(
        repos.users.clone(),
        &config.auth.jwt_secret,
        config.auth.token_expiry_hours,
    );

    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;
    let state = AppState {
        repos,
        workflow: Arc::new(workflow),
        auth: Arc::new(auth),
        oauth: Arc::new(oauth),
        monitor,
        pagination: config.pagination.clone(),
    };
    let options = ServerOptions {
        enable_cors: config.server.enable_cors,
    };

    info!("Server configuration:");
    info!("  Listen address: {}", addr);
    info!("  Storage: {}", if in_memory { "memory" } else { "postgres" });
    info!("  Page size: {}", config.pagination.page_size);

    WebServer::new(addr, state, options).run().await
}
