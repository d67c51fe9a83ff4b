use crate::config::Config;
use log::LevelFilter;
use simplelog::{self, ConfigBuilder, SharedLogger};

/// Transport and runtime crates that drown out the server's own logs below Trace.
const FILTERED_MODULES: &[&str] = &[
    "tower",
    "hyper",
    "axum",
    "tokio_tungstenite",
    "tungstenite",
    "mio",
];

/// Per-connection session, topic and transport logging. These can be given
/// their own threshold through `realtime_log_level`.
const REALTIME_MODULES: &[&str] = &["realtime", "web"];

/// One terminal output with its threshold and module filters.
#[derive(Debug, PartialEq)]
struct Output {
    level: LevelFilter,
    allow: Vec<&'static str>,
    ignore: Vec<&'static str>,
}

impl Output {
    fn into_logger(self) -> Box<dyn SharedLogger> {
        let mut builder = ConfigBuilder::new();
        builder.set_time_format_rfc3339();
        for module in &self.allow {
            builder.add_filter_allow_str(*module);
        }
        for module in &self.ignore {
            builder.add_filter_ignore_str(*module);
        }
        simplelog::TermLogger::new(
            self.level,
            builder.build(),
            simplelog::TerminalMode::Mixed,
            simplelog::ColorChoice::Auto,
        )
    }
}

pub struct Logger {}

impl Logger {
    /// Initializes the global logger from `config`.
    pub fn init_logger(config: &Config) {
        let loggers = Self::outputs(config.log_level_filter, config.realtime_log_level)
            .into_iter()
            .map(Output::into_logger)
            .collect();
        simplelog::CombinedLogger::init(loggers).expect("Failed to start simplelog");
    }

    /// Splits logging into a general output and, when its level differs, a
    /// second output carrying only the realtime modules.
    fn outputs(level: LevelFilter, realtime_level: Option<LevelFilter>) -> Vec<Output> {
        let mut general = Output {
            level,
            allow: Vec::new(),
            ignore: if level == LevelFilter::Trace {
                Vec::new()
            } else {
                FILTERED_MODULES.to_vec()
            },
        };

        match realtime_level {
            Some(realtime_level) if realtime_level != level => {
                general.ignore.extend_from_slice(REALTIME_MODULES);
                let realtime = Output {
                    level: realtime_level,
                    allow: REALTIME_MODULES.to_vec(),
                    ignore: Vec::new(),
                };
                vec![general, realtime]
            }
            _ => vec![general],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_output_filters_transport_dependencies() {
        let outputs = Logger::outputs(LevelFilter::Info, None);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].level, LevelFilter::Info);
        for module in ["tower", "hyper", "axum", "tungstenite"] {
            assert!(outputs[0].ignore.contains(&module), "{module} should be filtered");
        }
        assert!(outputs[0].allow.is_empty());
    }

    #[test]
    fn trace_level_keeps_dependency_logs() {
        let outputs = Logger::outputs(LevelFilter::Trace, None);
        assert!(outputs[0].ignore.is_empty());
    }

    #[test]
    fn realtime_level_gets_its_own_output() {
        let outputs = Logger::outputs(LevelFilter::Warn, Some(LevelFilter::Debug));
        assert_eq!(outputs.len(), 2);

        let general = &outputs[0];
        assert_eq!(general.level, LevelFilter::Warn);
        assert!(general.ignore.contains(&"realtime"));
        assert!(general.ignore.contains(&"web"));

        let realtime = &outputs[1];
        assert_eq!(realtime.level, LevelFilter::Debug);
        assert_eq!(realtime.allow, vec!["realtime", "web"]);
        assert!(realtime.ignore.is_empty());
    }

    #[test]
    fn matching_realtime_level_needs_no_split() {
        let outputs = Logger::outputs(LevelFilter::Debug, Some(LevelFilter::Debug));
        assert_eq!(outputs.len(), 1);
        assert!(!outputs[0].ignore.contains(&"realtime"));
    }
}
