pub mod schema;

pub use schema::{default_config_dir, Config, DeliveryConfig, SlotConfig, TracerConfig};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(config.slots.window_size > 0);
        assert!(config.slots.submit_timeout_ms > 0);
        assert!(config.tracer.channel_capacity > 0);
    }

    #[test]
    fn reexported_section_configs_are_constructible() {
        let slots = SlotConfig {
            window_size: 3,
            accumulation_timeout_ms: 5000,
            ..SlotConfig::default()
        };
        let delivery = DeliveryConfig {
            max_redelivery_attempts: 2,
        };
        let tracer = TracerConfig {
            enabled: true,
            ..TracerConfig::default()
        };

        assert_eq!(slots.window_size, 3);
        assert_eq!(delivery.max_redelivery_attempts, 2);
        assert!(tracer.enabled);
    }
}
