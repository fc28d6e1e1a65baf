/// Object matching grammar for policy rules.
///
/// - `*` matches every object.
/// - `<base>/*` matches `<base>` itself and anything below it on a `/` boundary.
/// - anything else matches exactly.
///
/// A trailing `/` is ignored on both the pattern and the requested object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectPattern {
    Any,
    Subtree(String),
    Exact(String),
}

impl ObjectPattern {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw == "*" {
            return ObjectPattern::Any;
        }

        match raw.strip_suffix("/*") {
            Some(base) => {
                let base = normalize_object(base);
                if base == "/" {
                    ObjectPattern::Any
                } else {
                    ObjectPattern::Subtree(base.to_string())
                }
            }
            None => ObjectPattern::Exact(normalize_object(raw).to_string()),
        }
    }

    /// `object` must already be normalized.
    pub fn matches(&self, object: &str) -> bool {
        match self {
            ObjectPattern::Any => true,
            ObjectPattern::Exact(expected) => expected == object,
            ObjectPattern::Subtree(base) => match object.strip_prefix(base.as_str()) {
                Some("") => true,
                Some(rest) => rest.starts_with('/'),
                None => false,
            },
        }
    }
}

pub fn normalize_object(object: &str) -> &str {
    let trimmed = object.trim();
    if trimmed.is_empty() {
        return "/";
    }
    let stripped = trimmed.trim_end_matches('/');
    if stripped.is_empty() {
        "/"
    } else {
        stripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_matches_only_itself() {
        let pattern = ObjectPattern::parse("/api/v1/menus");
        assert!(pattern.matches("/api/v1/menus"));
        assert!(!pattern.matches("/api/v1/menus/1"));
        assert!(!pattern.matches("/api/v1"));
    }

    #[test]
    fn subtree_pattern_matches_base_and_descendants() {
        let pattern = ObjectPattern::parse("/api/v1/menus/*");
        assert_eq!(pattern, ObjectPattern::Subtree("/api/v1/menus".into()));
        assert!(pattern.matches("/api/v1/menus"));
        assert!(pattern.matches("/api/v1/menus/42"));
        assert!(pattern.matches("/api/v1/menus/42/children"));
        assert!(!pattern.matches("/api/v1/menusx"));
        assert!(!pattern.matches("/api/v1/roles"));
    }

    #[test]
    fn star_and_root_subtree_match_everything() {
        assert_eq!(ObjectPattern::parse("*"), ObjectPattern::Any);
        assert_eq!(ObjectPattern::parse("/*"), ObjectPattern::Any);
        assert!(ObjectPattern::Any.matches("/anything/at/all"));
    }

    #[test]
    fn trailing_slashes_are_ignored() {
        let pattern = ObjectPattern::parse("/api/v1/users/");
        assert!(pattern.matches(normalize_object("/api/v1/users/")));
        assert_eq!(normalize_object("/"), "/");
        assert_eq!(normalize_object(""), "/");
        assert_eq!(normalize_object("/a//"), "/a");
    }

    #[test]
    fn inner_star_is_literal() {
        let pattern = ObjectPattern::parse("/api/*/menus");
        assert!(pattern.matches("/api/*/menus"));
        assert!(!pattern.matches("/api/v1/menus"));
    }
}
