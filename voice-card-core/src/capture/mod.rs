pub mod capture_session;
