use super::models::{Plan, PlanChange};

pub const MASK: &str = "****";

/// First two and last two characters survive when the value is longer than four.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return MASK.to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}{MASK}{tail}")
}

pub fn mask_change(change: &PlanChange) -> PlanChange {
    if !change.sensitive {
        return change.clone();
    }
    let mut masked = change.clone();
    masked.local_value = masked.local_value.as_deref().map(mask_value);
    masked.remote_value = masked.remote_value.as_deref().map(mask_value);
    masked
}

pub fn mask_plan(plan: &Plan) -> Plan {
    let mut masked = plan.clone();
    masked.changes = plan.changes.iter().map(mask_change).collect();
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;

    #[test]
    fn keeps_two_characters_each_side() {
        assert_eq!(mask_value("a1b2c3"), "a1****c3");
        assert_eq!(mask_value("abcde"), "ab****de");
        assert_eq!(mask_value("abcd"), "****");
        assert_eq!(mask_value(""), "****");
        assert_eq!(mask_value("ééééé"), "éé****éé");
    }

    #[test]
    fn only_sensitive_changes_are_masked() {
        let secret = PlanChange::update("API_KEY", Scope::Shared, true, "a1b2c3".into(), "old".into());
        let plain = PlanChange::add("PORT", Scope::Shared, false, "3000".into());
        let masked = mask_change(&secret);
        assert_eq!(masked.local_value.as_deref(), Some("a1****c3"));
        assert_eq!(masked.remote_value.as_deref(), Some("****"));
        assert_eq!(mask_change(&plain), plain);
    }
}
