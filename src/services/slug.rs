//! URL slugs derived from titles

/// Generate a URL-friendly slug from a title.
///
/// Lowercases, folds common Latin accents to ASCII, turns every other
/// character into a hyphen and collapses runs of hyphens.
pub fn generate_slug(title: &str) -> String {
    let mut result = String::with_capacity(title.len());
    let mut prev_hyphen = true;

    for c in title.to_lowercase().chars() {
        let folded = fold_accent(c);
        if folded.is_empty() {
            if !prev_hyphen {
                result.push('-');
                prev_hyphen = true;
            }
            continue;
        }
        result.push_str(folded);
        prev_hyphen = false;
    }

    result.trim_end_matches('-').to_string()
}

/// True for non-empty lowercase ASCII words separated by single hyphens
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 200
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn fold_accent(c: char) -> &'static str {
    match c {
        'a'..='z' | '0'..='9' => ascii_str(c),
        'à' | 'á' | 'â' | 'ä' | 'ã' | 'å' => "a",
        'æ' => "ae",
        'ç' => "c",
        'è' | 'é' | 'ê' | 'ë' => "e",
        'ì' | 'í' | 'î' | 'ï' => "i",
        'ñ' => "n",
        'ò' | 'ó' | 'ô' | 'ö' | 'õ' | 'ø' => "o",
        'œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' => "u",
        'ý' | 'ÿ' => "y",
        'ß' => "ss",
        _ => "",
    }
}

fn ascii_str(c: char) -> &'static str {
    const TABLE: &str = "abcdefghijklmnopqrstuvwxyz0123456789";
    match TABLE.find(c) {
        Some(i) => &TABLE[i..i + 1],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generate_slug() {
        assert_eq!(generate_slug("Rust avancé"), "rust-avance");
        assert_eq!(generate_slug("  Gestion de projet : les bases!  "), "gestion-de-projet-les-bases");
        assert_eq!(generate_slug("Cœur & âme"), "coeur-ame");
        assert_eq!(generate_slug("Straße 2030"), "strasse-2030");
        assert_eq!(generate_slug("---"), "");
    }

    #[test]
    fn test_is_valid_slug() {
        assert!(is_valid_slug("rust-avance"));
        assert!(is_valid_slug("episode-12"));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug("Rust"));
        assert!(!is_valid_slug("-rust"));
        assert!(!is_valid_slug("rust--avance"));
        assert!(!is_valid_slug("rust avance"));
    }

    proptest! {
        #[test]
        fn generated_slugs_are_valid_or_empty(title in "\\PC{0,60}") {
            let slug = generate_slug(&title);
            prop_assert!(slug.is_empty() || is_valid_slug(&slug) || slug.len() > 200);
        }
    }
}
