//! Counter demo for the plugin bridge.
//!
//! Run the in-process scenario with:
//!   cargo run -p counter-demo -- [STORAGE_PATH]
//!
//! Or serve the executor over WebSocket with:
//!   cargo run -p counter-demo -- serve [STORAGE_PATH]
//!
//! and open http://localhost:3000 in your browser.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use plugin_bridge_caller::{Caller, CallerConfig};
use plugin_bridge_core::{FunctionRef, NodeRef};
use plugin_bridge_executor::{
    ClientStorage, Executor, FileClientStorage, HostApi, HostError, MemoryClientStorage,
    MemorySceneGraph,
};
use plugin_bridge_store::ReplicatedStore;
use plugin_bridge_transport::{ChannelTransport, websocket::create_ws_router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1).peekable();
    let serve = args.next_if(|arg| arg == "serve").is_some();
    let storage_path = args.next().map(PathBuf::from);

    let executor = host_executor(storage_path);
    if serve {
        serve_ws(executor).await
    } else {
        run_scenario(executor).await
    }
}

/// Build the host side: storage, a small document, and the host functions
/// the UI may name.
fn host_executor(storage_path: Option<PathBuf>) -> Executor {
    let storage: Arc<dyn ClientStorage> = match storage_path {
        Some(path) => {
            tracing::info!("Using file storage at {}", path.display());
            Arc::new(FileClientStorage::new(path))
        }
        None => Arc::new(MemoryClientStorage::new()),
    };

    let scene = Arc::new(MemorySceneGraph::new());
    scene.insert(NodeRef::new("1:1", "Counter", "TEXT"));
    scene.select(["1:1"]);

    let api = HostApi::new(storage).with_scene(scene);
    let executor = Executor::with_builtins(api);

    let functions = executor.functions();
    functions.register_sync("increment", |_, count| {
        let n = count
            .as_i64()
            .ok_or_else(|| HostError::msg("count is not a number"))?;
        Ok(Some(json!(n + 1)))
    });
    functions.register_sync("selection", |api, _| {
        Ok(Some(json!(api.scene().selection())))
    });

    executor
}

/// Drive a counter store through a full mount/update/remount cycle.
async fn run_scenario(executor: Executor) -> anyhow::Result<()> {
    let (ui, host) = ChannelTransport::pair();
    let serving = executor.spawn_serve(Arc::new(host));
    let caller = Caller::spawn(Arc::new(ui), CallerConfig::new().plugin_id("counter-demo"))
        .context("failed to start caller")?;

    let store = ReplicatedStore::builder(caller.clone(), "count", 0_i64)
        .node_target(FunctionRef::new("selection"))
        .create()
        .await;
    let _subscription = store.subscribe(|count| tracing::info!(count, "Counter changed"));

    store.set(store.get() + 5);
    store.update(|count| Some(count * 2));
    if let Some(count) = store.update_async(FunctionRef::new("increment")).await {
        tracing::info!(count, "Incremented on the host");
    }
    store.flush().await;

    match store.get_node_target().await {
        Ok(Some(target)) => {
            for node in target.nodes() {
                tracing::info!(id = %node.id, name = %node.name, "Counter is shown in");
            }
        }
        Ok(None) => tracing::info!("Counter has no node target"),
        Err(e) => tracing::warn!("Failed to resolve node target: {e}"),
    }

    let expected = store.get();
    drop(store);

    let remounted = ReplicatedStore::create(caller, "count", 0_i64).await;
    tracing::info!(count = remounted.get(), "Remounted counter");
    anyhow::ensure!(
        remounted.get() == expected,
        "remounted counter {} does not match {expected}",
        remounted.get()
    );

    drop(remounted);
    serving.abort();
    Ok(())
}

async fn serve_ws(executor: Executor) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(executor))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Plugin Bridge - Counter</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        #count { font-size: 64px; margin: 20px 0; }
        button { font-size: 16px; margin-right: 8px; }
        .status { color: #888; font-size: 14px; margin-bottom: 10px; }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Plugin Bridge Counter</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="count">-</div>
    <button id="local">+1 (local first)</button>
    <button id="host">+1 (on host)</button>

    <script>
        const status = document.getElementById('status');
        const countEl = document.getElementById('count');
        const pending = new Map();
        let nextId = 0;
        let count = 0;
        let ws;

        function call(code, params) {
            const id = nextId++;
            const frame = {
                pluginMessage: { kind: 'EVAL', id, code, params: JSON.stringify(params) },
                pluginId: 'counter-demo',
            };
            return new Promise((resolve, reject) => {
                pending.set(id, { resolve, reject });
                ws.send(JSON.stringify(frame));
            });
        }

        function show(value) {
            count = value;
            countEl.textContent = value;
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = async () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
                const stored = await call('storage.get', { key: 'count' });
                show(stored === undefined ? 0 : stored);
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onmessage = (event) => {
                let msg;
                try {
                    msg = JSON.parse(event.data).pluginMessage;
                } catch (e) {
                    return;
                }
                const entry = msg && pending.get(msg.id);
                if (!entry) return;
                pending.delete(msg.id);
                if (msg.kind === 'EVAL_RESULT') {
                    entry.resolve(msg.result);
                } else if (msg.kind === 'EVAL_REJECT') {
                    entry.reject(new Error(msg.error ?? 'An error occurred while running a host operation'));
                }
            };
        }

        document.getElementById('local').onclick = () => {
            show(count + 1);
            call('storage.set', { key: 'count', value: count })
                .catch((e) => console.error('Persist failed:', e));
        };

        document.getElementById('host').onclick = async () => {
            try {
                const updated = await call('storage.update', {
                    key: 'count',
                    transform: { kind: 'function-ref', id: 'increment' },
                    initialValue: 0,
                });
                if (updated !== undefined) show(updated);
            } catch (e) {
                console.error('Update failed:', e);
            }
        };

        connect();
    </script>
</body>
</html>
"#;
