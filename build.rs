//! Stamps the CLI version line with the build date and time.
//! `XMF_BUILD_DATE` / `XMF_BUILD_TIME` from the environment take precedence.

use time::format_description;
use time::OffsetDateTime;

fn stamp(var: &str, now: OffsetDateTime, pattern: &str) -> String {
    if let Ok(value) = std::env::var(var) {
        return value;
    }
    let items = match format_description::parse(pattern) {
        Ok(items) => items,
        Err(_) => return "unknown".to_string(),
    };
    now.format(&items).unwrap_or_else(|_| "unknown".to_string())
}

fn main() {
    let now = OffsetDateTime::now_utc();
    let date = stamp("XMF_BUILD_DATE", now, "[month repr:short] [day padding:space] [year]");
    let time = stamp("XMF_BUILD_TIME", now, "[hour]:[minute]:[second]");

    println!("cargo:rerun-if-env-changed=XMF_BUILD_DATE");
    println!("cargo:rerun-if-env-changed=XMF_BUILD_TIME");
    println!("cargo:rustc-env=XMF_BUILD_DATE={}", date);
    println!("cargo:rustc-env=XMF_BUILD_TIME={}", time);
}
