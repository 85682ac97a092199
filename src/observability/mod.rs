pub mod pii;
pub mod metrics;

use chrono::Utc;
use serde_json::{json, Value};
use self::pii::scrub_text;
use crate::masking::redact_details;

/// JSON-lines console logger for the subsystem's own diagnostics.
#[derive(Clone)]
pub struct Logger {
    service_id: String,
}

impl Logger {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self { service_id: service_id.into() }
    }

    pub fn info(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("INFO", msg, context);
        println!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    pub fn warn(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("WARN", msg, context);
        println!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    pub fn error(&self, msg: &str, context: Option<&Value>) {
        let entry = self.build_entry("ERROR", msg, context);
        eprintln!("{}", serde_json::to_string(&entry).unwrap_or_default());
    }

    fn build_entry(&self, level: &str, msg: &str, context: Option<&Value>) -> Value {
        let mut base = json!({
            "ts": Utc::now().to_rfc3339(),
            "level": level,
            "msg": scrub_text(msg),
            "service_id": self.service_id,
        });

        if let (Some(base_obj), Some(ctx_obj)) = (base.as_object_mut(), context.and_then(Value::as_object)) {
            for (k, v) in redact_details(ctx_obj) {
                let safe_v = match v {
                    Value::String(s) => Value::String(scrub_text(&s)),
                    other => other,
                };
                base_obj.insert(k, safe_v);
            }
        }

        base
    }
}
