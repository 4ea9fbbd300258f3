use percent_encoding::percent_decode_str;

use crate::api::API_PREFIX;

fn decoded(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn household_rest(path: &str) -> Option<(&str, std::str::Split<'_, char>)> {
    let rest = path.strip_prefix(API_PREFIX)?.strip_prefix("/households/")?;
    let mut it = rest.split('/');
    let household = it.next()?;
    if household.is_empty() {
        None
    } else {
        Some((household, it))
    }
}

/// Extracts `{household_id}` from `/api/households/{household_id}/...`.
/// Returns a percent-decoded owned [`String`].
pub fn household_id_from_path(path: &str) -> Option<String> {
    household_rest(path).map(|(h, _)| decoded(h))
}

/// Extracts `{child_id}` from `/api/households/{household_id}/children/{child_id}/...`.
/// Returns a percent-decoded owned [`String`].
pub fn child_id_from_path(path: &str) -> Option<String> {
    let (_, mut it) = household_rest(path)?;
    if it.next()? != "children" {
        return None;
    }
    let child = it.next()?;
    if child.is_empty() {
        None
    } else {
        Some(decoded(child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn household_and_child_are_extracted_and_decoded() {
        let path = "/api/households/h%201/children/kid%2Fa/points";
        assert_eq!(household_id_from_path(path).as_deref(), Some("h 1"));
        assert_eq!(child_id_from_path(path).as_deref(), Some("kid/a"));
    }

    #[test]
    fn unrelated_paths_yield_nothing() {
        assert_eq!(household_id_from_path("/api/households"), None);
        assert_eq!(household_id_from_path("/api/households/"), None);
        assert_eq!(household_id_from_path("/healthz"), None);
        assert_eq!(child_id_from_path("/api/households/h1/tasks/t1"), None);
        assert_eq!(child_id_from_path("/api/households/h1/children"), None);
    }
}
