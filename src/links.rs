//! Client-opened contact links derived for an order: a messaging-app chat
//! link per phone number and a `mailto:` link per email address.

/// Keeps only ASCII digits. `None` when nothing usable remains.
pub fn normalize_phone(phone: Option<&str>) -> Option<String> {
    let digits: String = phone?.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Percent-encodes like JavaScript's `encodeURIComponent`.
pub fn encode_component(text: &str) -> String {
    let mut encoded = String::with_capacity(text.len());
    for byte in text.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(char::from(byte)),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// `<base>/<digits>?text=<message>`, or `None` without a usable phone.
pub fn messaging_link(base: &str, phone: Option<&str>, message: &str) -> Option<String> {
    let digits = normalize_phone(phone)?;
    Some(format!(
        "{}/{digits}?text={}",
        base.trim_end_matches('/'),
        encode_component(message)
    ))
}

pub fn mailto_link(email: Option<&str>, subject: &str, body: &str) -> Option<String> {
    let email = email.map(str::trim).filter(|email| !email.is_empty())?;
    Some(format!(
        "mailto:{email}?subject={}&body={}",
        encode_component(subject),
        encode_component(body)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_keeps_digits_only() {
        assert_eq!(
            normalize_phone(Some("(044) 123-4567")),
            Some("0441234567".to_string())
        );
        assert_eq!(normalize_phone(Some("+91 98 7654")), Some("91987654".to_string()));
    }

    #[test]
    fn phone_without_digits_is_absent() {
        assert_eq!(normalize_phone(None), None);
        assert_eq!(normalize_phone(Some("")), None);
        assert_eq!(normalize_phone(Some("n/a")), None);
    }

    #[test]
    fn component_encoding_matches_browsers() {
        assert_eq!(encode_component("Total: 100"), "Total%3A%20100");
        assert_eq!(encode_component("a\nb"), "a%0Ab");
        assert_eq!(encode_component("(ok)!*~'"), "(ok)!*~'");
        assert_eq!(encode_component("₹"), "%E2%82%B9");
    }

    #[test]
    fn messaging_link_uses_normalized_phone() {
        let link = messaging_link("https://wa.me/", Some("(044) 123-4567"), "hi there");
        assert_eq!(link.as_deref(), Some("https://wa.me/0441234567?text=hi%20there"));
        assert_eq!(messaging_link("https://wa.me", Some(" - "), "hi"), None);
    }

    #[test]
    fn mailto_link_requires_an_address() {
        assert_eq!(
            mailto_link(Some("a@b.com"), "Order Confirmation", "x y").as_deref(),
            Some("mailto:a@b.com?subject=Order%20Confirmation&body=x%20y")
        );
        assert_eq!(mailto_link(None, "s", "b"), None);
        assert_eq!(mailto_link(Some(" "), "s", "b"), None);
    }
}
