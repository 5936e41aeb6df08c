//! Configuration file watcher
//!
//! The hosting platform rewrites the configuration document whenever the
//! server's allocation state changes. The watcher observes the directory
//! containing the file, reparses it on each write, and propagates the new
//! snapshot. File events are processed one at a time: a reparse completes
//! and propagates before the next event is consumed.

use std::path::Path;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::Config;
use crate::error::SdkError;
use crate::server::{Server, ServerType};

/// Watches the configuration file until the server shuts down. `ready_tx`
/// fires once the watch is installed; installation failures are delivered
/// through it and abort startup.
pub(crate) async fn run(server: Server, ready_tx: oneshot::Sender<Result<(), SdkError>>) {
    let config_path = server.inner.options.config_path.clone();
    let watch_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    // notify delivers events on its own thread; bridge them into the task.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<notify::Result<notify::Event>>(16);
    let mut watcher = match RecommendedWatcher::new(
        move |result: notify::Result<notify::Event>| {
            let _ = tx.blocking_send(result);
        },
        notify::Config::default(),
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            let _ = ready_tx.send(Err(SdkError::Watch(e)));
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        let _ = ready_tx.send(Err(SdkError::Watch(e)));
        return;
    }

    let _ = ready_tx.send(Ok(()));
    debug!(path = %config_path.display(), "watching configuration file");

    let shutdown = server.inner.shutdown.clone();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                None => break,
                Some(Err(e)) => server.inner.events.push_error(SdkError::Watch(e)),
                Some(Ok(event)) => {
                    // Ignore events for other files in the directory, and
                    // anything other than a rewrite of the content.
                    if !event.paths.iter().any(|p| p.file_name() == config_path.file_name()) {
                        continue;
                    }
                    if !matches!(event.kind, EventKind::Modify(_)) {
                        continue;
                    }

                    handle_rewrite(&server, &config_path).await;
                }
            }
        }
    }

    debug!("config watcher stopped");
}

/// Reparses the configuration file and propagates the result.
async fn handle_rewrite(server: &Server, path: &Path) {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) => {
            server.inner.events.push_error(SdkError::ConfigRead(e));
            return;
        }
    };

    let config = match Config::from_slice(&raw) {
        Ok(config) => config,
        // The platform truncates the file in two writes during
        // deallocation; the first write produces an empty file, which is
        // not an error worth surfacing.
        Err(e) if e.is_eof() => return,
        Err(e) => {
            server.inner.events.push_error(SdkError::ConfigParse(e));
            return;
        }
    };

    if server.inner.server_type == ServerType::Allocation {
        if config.allocated_uuid.is_empty() {
            server.inner.events.push_deallocated(String::new());
        } else {
            server
                .inner
                .events
                .push_allocated(config.allocated_uuid.clone());
        }
    }

    let protocol_changed = {
        let current = server.inner.current_config.read();
        current.query_type != config.query_type || current.query_port != config.query_port
    };

    server.set_config(config.clone());

    if protocol_changed {
        if let Err(e) = server.switch_query_protocol(&config).await {
            server.inner.events.push_error(e);
        }
    }
}
