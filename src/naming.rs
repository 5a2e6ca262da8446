/// Characters kept as-is by [normalize]: ASCII word characters and the
/// Latin-1 Supplement / Latin Extended-A letters (`À` through `ž`).
fn is_kept(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || ('\u{C0}'..='\u{17E}').contains(&c)
}

fn replace_unkept(s: &str) -> String {
    s.chars().map(|c| if is_kept(c) { c } else { '-' }).collect()
}

/// Converts any identifier into a dash-separated lowercase resource name.
///
/// `Test Application` -> `test-application`
/// `testApplication` -> `test-application`
///
/// The result is stable: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(identifier: &str) -> String {
    let mut split = String::with_capacity(identifier.len());
    let mut previous: Option<char> = None;
    for c in identifier.trim().chars() {
        if previous.is_some_and(|p| p.is_ascii_lowercase()) && c.is_ascii_uppercase() {
            split.push('-');
        }
        split.push(c);
        previous = Some(c);
    }

    // Lowercasing can expand into combining marks (e.g. `İ`), so filter again afterwards.
    let lowered = replace_unkept(&replace_unkept(&split).to_lowercase());

    lowered
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::normalize;

    #[test]
    fn spaces_and_camel_case() {
        assert_eq!(normalize("Test Application"), "test-application");
        assert_eq!(normalize("testApplication"), "test-application");
        assert_eq!(normalize("HelloParameterStoreSecrets"), "hello-parameter-store-secrets");
    }

    #[test]
    fn trims_and_collapses_separators() {
        assert_eq!(normalize("  --my__app..v2--  "), "my__app-v2");
        assert_eq!(normalize("a///b"), "a-b");
        assert_eq!(normalize("---"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn consecutive_capitals_are_not_split() {
        assert_eq!(normalize("HTTPServer"), "httpserver");
        assert_eq!(normalize("myHTTPServer"), "my-httpserver");
    }

    #[test]
    fn extended_latin_is_kept() {
        assert_eq!(normalize("Crème Brûlée"), "crème-brûlée");
        assert_eq!(normalize("Ærø"), "ærø");
    }

    #[test]
    fn other_scripts_become_separators() {
        assert_eq!(normalize("app 🚀 launch"), "app-launch");
        assert_eq!(normalize("日本app"), "app");
    }

    #[test]
    fn dotted_capital_i_is_stable() {
        let once = normalize("İstanbul");
        assert_eq!(normalize(&once), once);
    }
}
