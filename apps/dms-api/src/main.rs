//! 控制面入口：装配存储、注册表、传输适配器与两侧协议引擎，
//! 对外起一个 axum 服务（操作员 REST + CWMP ACS 端点）。

mod handlers;
mod routes;
mod state;
mod utils;

pub use state::AppState;

use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use dms_config::AppConfig;
use dms_cwmp::{AcsConfig, AcsService, AuthMode, ConnectionRequester};
use dms_ops::{CwmpDeviceEngine, OpsConfig, OpsService, UspDeviceEngine};
use dms_pipeline::{PersistSink, SinkConfig};
use dms_registry::{spawn_janitor, DeviceDescriptor, DeviceRegistry, TransportHandle};
use dms_storage::retry::Backoff;
use dms_storage::{
    CacheStore, DeviceFilter, DeviceStore, InstanceStore, OperationStore, ParameterStore,
    SubscriptionStore, TransferStore,
};
use dms_storage::postgres::{
    PgDeviceStore, PgInstanceStore, PgOperationStore, PgParameterStore, PgSubscriptionStore,
    PgTransferStore,
};
use dms_storage::redis::RedisCacheStore;
use dms_telemetry::{init_tracing, new_request_ids};
use dms_transport::datagram::DatagramTransport;
use dms_transport::queue_broker::QueueBrokerTransport;
use dms_transport::socket::WebSocketTransport;
use dms_transport::topic_broker::TopicBrokerTransport;
use dms_transport::{MtpConfig, MtpCredentials, MtpTransport, ReconnectBackoff};
use dms_usp::{SubscriptionRouter, UspEngine, UspEngineConfig};
use domain::DeviceId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    // Postgres 存储（需先执行 migrations）+ Redis 缓存
    let pool = dms_storage::connect_pool(&config.database_url).await?;
    let device_store: Arc<dyn DeviceStore> = Arc::new(PgDeviceStore::new(pool.clone()));
    let parameter_store: Arc<dyn ParameterStore> = Arc::new(PgParameterStore::new(pool.clone()));
    let instance_store: Arc<dyn InstanceStore> = Arc::new(PgInstanceStore::new(pool.clone()));
    let operation_store: Arc<dyn OperationStore> = Arc::new(PgOperationStore::new(pool.clone()));
    let transfer_store: Arc<dyn TransferStore> = Arc::new(PgTransferStore::new(pool.clone()));
    let subscription_store: Arc<dyn SubscriptionStore> =
        Arc::new(PgSubscriptionStore::new(pool));
    let cache: Arc<dyn CacheStore> = Arc::new(RedisCacheStore::connect(&config.redis_url)?);

    // 注册表 + 活性清扫
    let registry = Arc::new(DeviceRegistry::new(config.liveness_window_ms));
    preload_registry(&registry, &device_store).await;
    spawn_janitor(
        Arc::clone(&registry),
        Duration::from_millis(config.sweep_interval_ms),
    );

    // 订阅路由：投递任务进进程内通道（外部投递不在核心范围）
    let (router, mut deliveries) =
        SubscriptionRouter::new(Arc::clone(&subscription_store), config.event_queue_cap);
    let router = Arc::new(router);
    tokio::spawn(async move {
        while let Some(task) = deliveries.recv().await {
            info!(
                target: "dms.delivery",
                subscription_id = %task.subscription_id,
                delivery_target = %task.delivery_target,
                device_id = %task.device_id,
                event_type = %task.event_type,
                path = %task.path,
                "subscription delivery"
            );
        }
    });

    // 持久化下沉工作池
    let sink = PersistSink::spawn(
        Arc::clone(&parameter_store),
        Arc::clone(&transfer_store),
        SinkConfig {
            workers: config.persist_workers,
            queue_cap: config.event_queue_cap,
            max_retries: 3,
            backoff: Backoff::default(),
        },
    );

    // MTP 适配器（按配置启用）
    let (inbound_sender, inbound_receiver) = mpsc::channel(4_096);
    let reconnect = ReconnectBackoff {
        min_ms: config.reconnect_backoff_min_ms,
        max_ms: config.reconnect_backoff_max_ms,
        factor: config.reconnect_backoff_factor,
    };
    let mut transports: Vec<Arc<dyn MtpTransport>> = Vec::new();
    if config.stomp_enabled {
        transports.push(Arc::new(QueueBrokerTransport::new(
            MtpConfig {
                enabled: true,
                endpoint: config.stomp_addr.clone(),
                credentials: match (&config.stomp_login, &config.stomp_passcode) {
                    (Some(user), Some(secret)) => Some(MtpCredentials::UserSecret {
                        user: user.clone(),
                        secret: secret.clone(),
                    }),
                    _ => None,
                },
                keepalive_seconds: config.keepalive_seconds,
                max_inflight: config.max_inflight_per_device,
                reconnect,
            },
            inbound_sender.clone(),
        )));
    }
    if config.mqtt_enabled {
        transports.push(Arc::new(TopicBrokerTransport::new(
            MtpConfig {
                enabled: true,
                endpoint: format!("{}:{}", config.mqtt_host, config.mqtt_port),
                credentials: match (&config.mqtt_username, &config.mqtt_password) {
                    (Some(user), Some(secret)) => Some(MtpCredentials::UserSecret {
                        user: user.clone(),
                        secret: secret.clone(),
                    }),
                    _ => None,
                },
                keepalive_seconds: config.keepalive_seconds,
                max_inflight: config.max_inflight_per_device,
                reconnect,
            },
            inbound_sender.clone(),
        )));
    }
    if config.websocket_enabled {
        transports.push(Arc::new(WebSocketTransport::new(
            MtpConfig {
                enabled: true,
                endpoint: config.websocket_addr.clone(),
                credentials: None,
                keepalive_seconds: config.keepalive_seconds,
                max_inflight: config.max_inflight_per_device,
                reconnect,
            },
            inbound_sender.clone(),
        )));
    }
    if config.datagram_enabled {
        transports.push(Arc::new(DatagramTransport::new(
            MtpConfig {
                enabled: true,
                endpoint: config.datagram_addr.clone(),
                credentials: None,
                keepalive_seconds: config.keepalive_seconds,
                max_inflight: config.max_inflight_per_device,
                reconnect,
            },
            inbound_sender.clone(),
        )));
    }
    for transport in &transports {
        transport.connect().await?;
        info!(target: "dms", transport = transport.name(), "mtp adapter started");
    }
    drop(inbound_sender);

    // USP 引擎：入站分发 + 关联表审计
    let usp = UspEngine::new(
        UspEngineConfig {
            controller_id: "self::dms-controller".to_string(),
            correlation_cap: config.correlation_table_cap,
            dedup_cap: 8_192,
        },
        Arc::clone(&registry),
        transports,
        Arc::clone(&router),
        sink.clone(),
    );
    usp.spawn_dispatcher(inbound_receiver);
    usp.spawn_correlation_audit(Duration::from_secs(30));

    // CWMP ACS：会话引擎 + 超时清扫
    let requester = Arc::new(ConnectionRequester::new(
        config.connreq_auth,
        config.connreq_username.clone(),
        config.connreq_password.clone(),
    ));
    let acs = AcsService::new(
        AcsConfig {
            max_envelope_size: config.max_envelope_size,
            session_timeout_ms: (config.session_timeout_seconds * 1_000) as i64,
            auth_mode: AuthMode::parse(&config.acs_auth),
            device_username: config.acs_username.clone(),
            device_password: config.acs_password.clone(),
        },
        Arc::clone(&registry),
        Arc::clone(&device_store),
        Arc::clone(&transfer_store),
        sink.clone(),
        Arc::clone(&router),
        requester,
    );
    acs.spawn_session_sweeper(Duration::from_millis(config.sweep_interval_ms));

    // 操作门面：按设备类别分派
    let usp_engine = UspDeviceEngine::new(
        Arc::clone(&usp),
        Arc::clone(&parameter_store),
        Arc::clone(&instance_store),
    );
    let cwmp_engine = CwmpDeviceEngine::new(
        Arc::clone(&acs),
        Arc::clone(&parameter_store),
        Arc::clone(&instance_store),
    );
    let ops = OpsService::new(
        Arc::clone(&registry),
        usp_engine,
        cwmp_engine,
        operation_store,
        Arc::clone(&transfer_store),
        cache,
        Arc::clone(&router),
        sink.clone(),
        OpsConfig {
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
        },
    );

    let app_state = AppState {
        ops,
        acs,
        devices: device_store,
        subscriptions: subscription_store,
        registry,
        liveness_window_ms: config.liveness_window_ms,
    };
    let app = routes::build_router(app_state)
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context));

    info!(target: "dms", addr = %config.http_addr, "dms-api listening");
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// 重启后从存储回灌注册表（描述符与传输线索尽量还原）。
async fn preload_registry(registry: &Arc<DeviceRegistry>, device_store: &Arc<dyn DeviceStore>) {
    let records = match device_store.find_devices(&DeviceFilter::default()).await {
        Ok(records) => records,
        Err(err) => {
            warn!(target: "dms", error = %err, "registry preload skipped");
            return;
        }
    };
    let count = records.len();
    for record in records {
        let id = DeviceId::parse(&record.device_id);
        let descriptor = DeviceDescriptor {
            manufacturer: record.manufacturer.clone(),
            model_name: record.model_name.clone(),
            software_version: record.software_version.clone(),
            hardware_version: record.hardware_version.clone(),
        };
        let transport = match (&record.transport_kind, &record.transport_address) {
            (Some(kind), Some(address)) => TransportHandle::Usp {
                transport: kind.clone(),
                address: address.clone(),
            },
            _ => TransportHandle::Cwmp {
                connection_request_url: record.connection_request_url.clone(),
            },
        };
        if let Err(err) = registry.register(&id, descriptor, transport) {
            warn!(target: "dms", device_id = %record.device_id, error = %err, "preload register failed");
        }
    }
    info!(target: "dms", devices = count, "registry preloaded");
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    // 生成 request_id 与 trace_id，并注入请求扩展与日志
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}
