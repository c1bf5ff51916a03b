use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::distance::{DEFAULT_AVG_SPEED_KMH, RoutingConfig};
use crate::ranker::RankerConfig;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub routing: RoutingConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            routing: routing_from_env(),
            engine: EngineConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;

    fn from_env() -> Self {
        let host_value =
            env_string("SWMP_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse SWMP_API_HOST ('{}'): {}. Using {}.",
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    Self::DEFAULT_HOST
                        .parse::<IpAddr>()
                        .expect("Default host must be valid"),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string("SWMP_API_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    eprintln!("⚠️ SWMP_API_PORT must not be 0. Using {}.", Self::DEFAULT_PORT);
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    eprintln!(
                        "⚠️ Could not parse SWMP_API_PORT ('{}'): {}. Using {}.",
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Routing configuration from `SWMP_ROUTING_URL` and `SWMP_AVG_SPEED_KMH`.
fn routing_from_env() -> RoutingConfig {
    let base_url = env_string("SWMP_ROUTING_URL");
    let avg_speed_kmh = load_f64_with_warning(
        "SWMP_AVG_SPEED_KMH",
        DEFAULT_AVG_SPEED_KMH,
        |value| value > 0.0,
        "must be greater than 0",
        "Warning: Adjusted average speed changes fallback duration estimates",
    );

    RoutingConfig {
        base_url,
        avg_speed_kmh,
    }
}

/// Configuration for the facility-ranking engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    ranker: RankerConfig,
}

impl EngineConfig {
    const SCORE_EPSILON_VAR: &'static str = "SWMP_SCORE_EPSILON";
    const MAX_ALTERNATIVES_VAR: &'static str = "SWMP_MAX_ALTERNATIVES";
    const TRANSPORT_FACTOR_VAR: &'static str = "SWMP_TRANSPORT_KG_PER_TONNE_KM";

    fn from_env() -> Self {
        let score_epsilon = load_f64_with_warning(
            Self::SCORE_EPSILON_VAR,
            RankerConfig::DEFAULT_SCORE_EPSILON,
            |value| value > 0.0,
            "must be greater than 0",
            "Warning: Adjusted tie-break tolerance may change recommendations",
        );

        let transport_kg_per_tonne_km = load_f64_with_warning(
            Self::TRANSPORT_FACTOR_VAR,
            RankerConfig::DEFAULT_TRANSPORT_KG_PER_TONNE_KM,
            |value| value >= 0.0,
            "must not be negative",
            "Warning: Adjusted transport emissions factor changes carbon estimates",
        );

        let max_alternatives = match env_string(Self::MAX_ALTERNATIVES_VAR) {
            Some(raw) => match raw.parse::<usize>() {
                Ok(value) => value,
                Err(err) => {
                    eprintln!(
                        "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                        Self::MAX_ALTERNATIVES_VAR,
                        raw,
                        err,
                        RankerConfig::DEFAULT_MAX_ALTERNATIVES
                    );
                    RankerConfig::DEFAULT_MAX_ALTERNATIVES
                }
            },
            None => RankerConfig::DEFAULT_MAX_ALTERNATIVES,
        };

        let ranker = RankerConfig::builder()
            .score_epsilon(score_epsilon)
            .max_alternatives(max_alternatives)
            .transport_kg_per_tonne_km(transport_kg_per_tonne_km)
            .build();

        Self { ranker }
    }

    /// Returns the configured RankerConfig.
    pub fn ranker_config(&self) -> RankerConfig {
        self.ranker
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            eprintln!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    warning: &str,
) -> f64 {
    match env_string(var_name) {
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) => {
                if !validator(value) {
                    eprintln!(
                        "⚠️ {} contains invalid value '{}': {}. Using {}.",
                        var_name, raw, invalid_hint, default
                    );
                    default
                } else {
                    let tolerance = (default.abs().max(1.0)) * 1e-9;
                    if (value - default).abs() > tolerance {
                        println!("⚠️ {} ({} = {}).", warning, var_name, value);
                    }
                    value
                }
            }
            Err(err) => {
                eprintln!(
                    "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                    var_name, raw, err, default
                );
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_f64_uses_default_when_var_is_absent() {
        let value = load_f64_with_warning(
            "SWMP_TEST_VAR_THAT_DOES_NOT_EXIST",
            1e-9,
            |v| v > 0.0,
            "must be greater than 0",
            "unused",
        );
        assert_eq!(value, 1e-9);
    }

    #[test]
    fn default_engine_config_matches_ranker_defaults() {
        let config = EngineConfig::from_env();
        let ranker = config.ranker_config();
        assert_eq!(ranker.score_epsilon, RankerConfig::DEFAULT_SCORE_EPSILON);
        assert_eq!(
            ranker.max_alternatives,
            RankerConfig::DEFAULT_MAX_ALTERNATIVES
        );
    }
}
