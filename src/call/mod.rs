pub mod controller;
pub mod machine;
pub mod state;

pub use controller::{CallController, CallDeps, CallHandle, ControlEvent};
pub use machine::CallStateMachine;
pub use state::{CallSnapshot, CallState};

use crate::peer::transport::TransportConfig;
use std::time::Duration;

/// Параметры одного экземпляра звонилки
#[derive(Debug, Clone)]
pub struct CallOptions {
    pub transport: TransportConfig,
    /// Сколько ждать разрешения на микрофон
    pub media_timeout: Duration,
    /// Отвечать ли `end-call` с причиной "busy" на offer во время звонка
    pub reply_busy: bool,
    /// Период повторной регистрации; `None` выключает heartbeat
    pub heartbeat: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            media_timeout: Duration::from_secs(10),
            reply_busy: false,
            heartbeat: Some(Duration::from_secs(25)),
        }
    }
}
