use std::env;

/// Typed configuration, loaded once at startup from environment variables
/// (spec.md §6 "CLI / env"). `.env` is read first, if present, via
/// `dotenvy`, then real environment variables win.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub server_port: u16,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379/0".to_owned());
        let server_port = env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret".to_owned());

        Config {
            redis_url,
            server_port,
            jwt_secret,
        }
    }
}
