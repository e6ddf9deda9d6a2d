//! Print a bearer credential for a user, signed with `JWT_SECRET`.
//!
//! Usage: `mint-token <user_id> [ttl_secs]`

use sync_api::auth::verifier::{JwtVerifier, TOKEN_TTL_SECS};

fn main() {
    let _ = dotenvy::dotenv();

    let mut args = std::env::args().skip(1);
    let user_id: i64 = match args.next().and_then(|v| v.parse().ok()) {
        Some(id) => id,
        None => {
            eprintln!("usage: mint-token <user_id> [ttl_secs]");
            std::process::exit(2);
        }
    };
    let ttl = args
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(TOKEN_TTL_SECS);

    let secret = match std::env::var("JWT_SECRET") {
        Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            eprintln!("JWT_SECRET must be set to the server's secret");
            std::process::exit(2);
        }
    };

    match JwtVerifier::new(&secret).issue(user_id, ttl) {
        Ok(token) => println!("{token}"),
        Err(e) => {
            eprintln!("failed to sign token: {e}");
            std::process::exit(1);
        }
    }
}
