use colored::Colorize;

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Value or a dimmed placeholder when empty
pub fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".dimmed().to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_unknown() {
        colored::control::set_override(false);
        assert_eq!(or_unknown(""), "unknown");
        assert_eq!(or_unknown("v1.30.2+k3s1"), "v1.30.2+k3s1");
    }
}
