use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use serde::Serialize;

use super::matcher::{normalize_object, ObjectPattern};
use super::{Effect, PolicyRule, RoleAssignment};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotStats {
    pub generation: u64,
    pub rules: usize,
    pub assignments: usize,
    pub subjects: usize,
    pub roles: usize,
    /// Duplicate (role, object, action) keys whose effect was replaced by a later rule.
    pub overridden: usize,
}

#[derive(Debug)]
struct PatternGrant {
    pattern: ObjectPattern,
    action: String,
    effect: Effect,
}

#[derive(Debug, Default)]
struct RoleGrants {
    /// object -> action -> effect
    exact: HashMap<String, HashMap<String, Effect>>,
    patterns: Vec<PatternGrant>,
}

#[derive(Debug, Default)]
struct Verdict {
    allowed: bool,
    denied: bool,
}

impl RoleGrants {
    fn collect(&self, object: &str, action: &str, verdict: &mut Verdict) {
        let exact = self.exact.get(object).and_then(|actions| actions.get(action));
        let patterned = self
            .patterns
            .iter()
            .filter(|grant| grant.action == action && grant.pattern.matches(object))
            .map(|grant| &grant.effect);

        for effect in exact.into_iter().chain(patterned) {
            match effect {
                Effect::Allow => verdict.allowed = true,
                Effect::Deny => verdict.denied = true,
            }
        }
    }
}

/// Immutable, queryable view of one complete policy load.
#[derive(Debug)]
pub struct Snapshot {
    roles_by_subject: HashMap<String, Vec<String>>,
    grants: HashMap<String, RoleGrants>,
    stats: SnapshotStats,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            roles_by_subject: HashMap::new(),
            grants: HashMap::new(),
            stats: SnapshotStats::default(),
        }
    }

    fn build(generation: u64, rules: &[PolicyRule], assignments: &[RoleAssignment]) -> Self {
        // Later rules overwrite earlier ones with the same key.
        let mut keyed: HashMap<(String, ObjectPattern, String), Effect> = HashMap::with_capacity(rules.len());
        let mut overridden = 0;

        for rule in rules {
            let key = (
                rule.role.clone(),
                ObjectPattern::parse(&rule.object),
                normalize_action(&rule.action),
            );
            if let Some(previous) = keyed.insert(key, rule.effect) {
                if previous != rule.effect {
                    overridden += 1;
                    tracing::warn!(
                        role = %rule.role,
                        object = %rule.object,
                        action = %rule.action,
                        previous = %previous,
                        effect = %rule.effect,
                        "conflicting policy rule, later rule wins"
                    );
                }
            }
        }

        let mut grants: HashMap<String, RoleGrants> = HashMap::new();
        for ((role, pattern, action), effect) in keyed {
            let entry = grants.entry(role).or_default();
            match pattern {
                ObjectPattern::Exact(object) => {
                    entry.exact.entry(object).or_default().insert(action, effect);
                }
                pattern => entry.patterns.push(PatternGrant { pattern, action, effect }),
            }
        }

        let mut memberships: HashMap<String, BTreeSet<String>> = HashMap::new();
        for assignment in assignments {
            memberships
                .entry(assignment.subject.clone())
                .or_default()
                .insert(assignment.role.clone());
        }
        let roles_by_subject: HashMap<String, Vec<String>> = memberships
            .into_iter()
            .map(|(subject, roles)| (subject, roles.into_iter().collect()))
            .collect();

        let stats = SnapshotStats {
            generation,
            rules: rules.len(),
            assignments: assignments.len(),
            subjects: roles_by_subject.len(),
            roles: grants.len(),
            overridden,
        };

        Self {
            roles_by_subject,
            grants,
            stats,
        }
    }

    /// Deny overrides allow across every role the subject holds; no match denies.
    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        let Some(roles) = self.roles_by_subject.get(subject) else {
            return false;
        };

        let object = normalize_object(object);
        let action = normalize_action(action);
        let mut verdict = Verdict::default();

        for role in roles {
            if let Some(grants) = self.grants.get(role) {
                grants.collect(object, &action, &mut verdict);
            }
        }

        verdict.allowed && !verdict.denied
    }

    pub fn roles_for(&self, subject: &str) -> &[String] {
        self.roles_by_subject
            .get(subject)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn generation(&self) -> u64 {
        self.stats.generation
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats
    }
}

fn normalize_action(action: &str) -> String {
    action.trim().to_ascii_uppercase()
}

/// In-memory policy engine.
///
/// Readers load the current [`Snapshot`] without locking. `reload` builds a
/// complete replacement and publishes it with a single pointer swap; writers
/// are serialized so generations stay monotonic.
#[derive(Debug)]
pub struct PolicyEnforcer {
    current: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

impl Default for PolicyEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEnforcer {
    /// Starts with an empty generation-0 snapshot that denies everything.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            writer: Mutex::new(()),
        }
    }

    pub fn reload(&self, rules: &[PolicyRule], assignments: &[RoleAssignment]) -> SnapshotStats {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let generation = self.current.load().generation() + 1;
        let snapshot = Snapshot::build(generation, rules, assignments);
        let stats = snapshot.stats();
        self.current.store(Arc::new(snapshot));

        tracing::info!(
            generation = stats.generation,
            rules = stats.rules,
            assignments = stats.assignments,
            subjects = stats.subjects,
            roles = stats.roles,
            overridden = stats.overridden,
            "policy snapshot published"
        );

        stats
    }

    pub fn enforce(&self, subject: &str, object: &str, action: &str) -> bool {
        self.current.load().enforce(subject, object, action)
    }

    /// Pins the current snapshot so several queries see the same policy.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation()
    }

    pub fn is_loaded(&self) -> bool {
        self.generation() > 0
    }
}
