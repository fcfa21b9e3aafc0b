use ulid::Ulid;

pub fn new_ulid_string() -> String {
    Ulid::new().to_string()
}

#[cfg(test)]
mod tests {
    use super::new_ulid_string;

    #[test]
    fn ulid_strings_are_unique_and_parseable() {
        let a = new_ulid_string();
        let b = new_ulid_string();
        assert_ne!(a, b);
        assert!(ulid::Ulid::from_string(&a).is_ok());
    }
}
