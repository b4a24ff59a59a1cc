/// Desktop host
/// Wires the services into a Tauri app: managed state, plugins, IPC
/// handlers and the exit hook that tears every PTY down.
///
/// The application crate owns the window config, so it finishes the build:
/// `builder(config).build(tauri::generate_context!())?.run(handle_run_event)`

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tauri::{AppHandle, Emitter, Manager, RunEvent, Wry};

use crate::commands;
use crate::config::CockpitConfig;
use crate::models::{NotificationRecord, SessionState, SlotId};
use crate::services::{
    ClaudeSettingsInstaller, DedupCache, HookInstaller, IngressServer, NotificationBus,
    NotificationConsumer, SessionManager, SlotDirectory, UiBridge, Utf8Carry,
};

/// Emits session output and notifications to the webview
pub struct TauriBridge {
    app: AppHandle,
    carry: Mutex<HashMap<SlotId, Utf8Carry>>,
}

impl TauriBridge {
    pub fn new(app: AppHandle) -> Self {
        Self {
            app,
            carry: Mutex::new(HashMap::new()),
        }
    }
}

impl UiBridge for TauriBridge {
    fn output(&self, slot: SlotId, data: &[u8]) {
        let text = self.carry.lock().entry(slot).or_default().push(data);
        if text.is_empty() {
            return;
        }
        let _ = self.app.emit(&format!("pty-output-{}", slot), text);
    }

    fn session_closed(&self, slot: SlotId, state: &SessionState) {
        self.carry.lock().remove(&slot);
        let _ = self.app.emit(&format!("pty-close-{}", slot), state.clone());
    }

    fn notification(&self, record: &NotificationRecord) {
        let _ = self.app.emit("hook-notification", record.clone());
    }
}

/// Ingress starts before the manager exists; slots read as not live until
/// it is attached
#[derive(Default)]
struct ManagerSlot(OnceLock<Arc<SessionManager>>);

impl SlotDirectory for ManagerSlot {
    fn is_live(&self, slot: SlotId) -> bool {
        self.0.get().map(|m| m.is_live(slot)).unwrap_or(false)
    }
}

/// Background services owned by the app, stopped from the exit hook
pub struct DesktopServices {
    manager: Arc<SessionManager>,
    ingress: Mutex<Option<IngressServer>>,
    consumer: Mutex<Option<NotificationConsumer>>,
}

impl DesktopServices {
    fn start(app: &AppHandle, config: &CockpitConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let bridge: Arc<dyn UiBridge> = Arc::new(TauriBridge::new(app.clone()));
        let bus = Arc::new(NotificationBus::open(config.bus.store_dir())?);
        let directory = Arc::new(ManagerSlot::default());

        // A busy port leaves the terminals usable without notifications
        let ingress = match IngressServer::start(
            &config.ingress,
            DedupCache::from_config(&config.dedup),
            bus.clone(),
            directory.clone(),
        ) {
            Ok(server) => Some(server),
            Err(e) => {
                log::error!("Hook ingress unavailable: {}", e);
                None
            }
        };
        let hook_url = ingress.as_ref().map(IngressServer::url);

        let manager = Arc::new(SessionManager::new(
            config.sessions.clone(),
            hook_url,
            bridge.clone(),
        ));
        let _ = directory.0.set(manager.clone());

        let consumer = NotificationConsumer::start(
            bus,
            bridge,
            config.bus.poll_interval(),
            config.bus.retention(),
        )?;

        Ok(Self {
            manager,
            ingress: Mutex::new(ingress),
            consumer: Mutex::new(Some(consumer)),
        })
    }

    fn shutdown(&self) {
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.stop();
        }
        if let Some(ingress) = self.ingress.lock().take() {
            ingress.stop();
        }
        self.manager.shutdown();
    }
}

pub fn builder(config: CockpitConfig) -> tauri::Builder<Wry> {
    tauri::Builder::default()
        .setup(move |app| {
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let services = DesktopServices::start(app.handle(), &config)?;
            app.manage(services.manager.clone());
            app.manage(services);

            let installer: Arc<dyn HookInstaller> = Arc::new(ClaudeSettingsInstaller::default_for_user()?);
            app.manage(installer);
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::pty::pty_spawn,
            commands::pty::pty_write,
            commands::pty::pty_resize,
            commands::pty::pty_close,
            commands::pty::pty_list,
            commands::hooks::hooks_status,
            commands::hooks::hooks_install,
        ])
}

/// Exit hook for `App::run`
pub fn handle_run_event(app: &AppHandle, event: RunEvent) {
    if let RunEvent::Exit = event {
        log::info!("App shutting down - cleaning up PTY processes");
        if let Some(services) = app.try_state::<DesktopServices>() {
            services.shutdown();
        }
    }
}
