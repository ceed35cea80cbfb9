pub mod service_auth;
