use thiserror::Error;

pub const DEFAULT_LOCATION: &str = "us-central1";
pub const DEFAULT_MODEL: &str = "imagen-3.0-fast-generate-001";
pub const GENERATED_IMAGES_BUCKET: &str = "generated-images";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Vertex AI predict endpoint settings.
#[derive(Debug, Clone)]
pub struct VertexSettings {
    pub project: String,
    pub location: String,
    pub access_token: String,
    pub api_base: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseSettings {
    pub url: String,
    pub service_role_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub admin_token: String,
    pub port: u16,
}

impl VertexSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let project = required(&lookup, "GOOGLE_CLOUD_PROJECT")?;
        let access_token = required(&lookup, "VERTEX_ACCESS_TOKEN")?;
        let location = optional(&lookup, "GOOGLE_CLOUD_LOCATION").unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let api_base = optional(&lookup, "VERTEX_API_BASE")
            .unwrap_or_else(|| format!("https://{location}-aiplatform.googleapis.com"));
        let model = optional(&lookup, "IMAGEN_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Ok(Self {
            project,
            location,
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            model,
        })
    }
}

impl SupabaseSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = optional(&lookup, "NEXT_PUBLIC_SUPABASE_URL")
            .or_else(|| optional(&lookup, "SUPABASE_URL"))
            .ok_or(ConfigError::Missing("NEXT_PUBLIC_SUPABASE_URL"))?;
        let service_role_key = required(&lookup, "SUPABASE_SERVICE_ROLE_KEY")?;
        let bucket = optional(&lookup, "GENERATED_IMAGES_BUCKET")
            .unwrap_or_else(|| GENERATED_IMAGES_BUCKET.to_string());
        Ok(Self { url: url.trim_end_matches('/').to_string(), service_role_key, bucket })
    }
}

impl ServerSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let admin_token = required(&lookup, "ADMIN_API_TOKEN")?;
        let port = match optional(&lookup, "PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => DEFAULT_PORT,
        };
        Ok(Self { admin_token, port })
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// Blank values count as unset.
fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<String, ConfigError> {
    optional(lookup, key).ok_or(ConfigError::Missing(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn vertex_defaults_follow_location() {
        let settings = VertexSettings::from_lookup(vars(&[
            ("GOOGLE_CLOUD_PROJECT", "windows-doors"),
            ("VERTEX_ACCESS_TOKEN", "ya29.token"),
            ("GOOGLE_CLOUD_LOCATION", "us-west1"),
        ]))
        .unwrap();
        assert_eq!(settings.api_base, "https://us-west1-aiplatform.googleapis.com");
        assert_eq!(settings.model, DEFAULT_MODEL);
    }

    #[test]
    fn blank_project_is_missing() {
        let err = VertexSettings::from_lookup(vars(&[
            ("GOOGLE_CLOUD_PROJECT", "  "),
            ("VERTEX_ACCESS_TOKEN", "ya29.token"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GOOGLE_CLOUD_PROJECT")));
    }

    #[test]
    fn supabase_accepts_either_url_key() {
        let settings = SupabaseSettings::from_lookup(vars(&[
            ("SUPABASE_URL", "https://abc.supabase.co/"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
        ]))
        .unwrap();
        assert_eq!(settings.url, "https://abc.supabase.co");
        assert_eq!(settings.bucket, GENERATED_IMAGES_BUCKET);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = ServerSettings::from_lookup(vars(&[("ADMIN_API_TOKEN", "t"), ("PORT", "http")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }
}
