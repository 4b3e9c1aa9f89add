//! Rule id layout and the domain rule table
//!
//! Ids `1001` and `1002` hold the low-data mode rules. Everything above
//! `1100` is a per-domain block rule. Domain rule ids are handed out
//! monotonically and looked up by domain, so removing one domain touches
//! exactly one rule.

use byteguard_core::rules::{ResourceType, Rule, RuleAction, RuleCondition};
use byteguard_core::types::{Domain, RuleId};
use std::collections::BTreeMap;

/// Lower bound (exclusive) of the low-data mode id range
pub const MODE_RULE_BASE: u32 = 1000;

/// Rule blocking images
pub const IMAGE_RULE_ID: RuleId = RuleId::new(MODE_RULE_BASE + 1);

/// Rule blocking audio/video
pub const MEDIA_RULE_ID: RuleId = RuleId::new(MODE_RULE_BASE + 2);

/// Lower bound (exclusive) of the domain rule id range
pub const DOMAIN_RULE_BASE: u32 = MODE_RULE_BASE + 100;

const MODE_RULE_PRIORITY: u32 = 1;
const DOMAIN_RULE_PRIORITY: u32 = 2;

/// Resource types a blocked domain may not load
pub const DOMAIN_BLOCKED_RESOURCES: [ResourceType; 6] = [
    ResourceType::MainFrame,
    ResourceType::SubFrame,
    ResourceType::Stylesheet,
    ResourceType::Script,
    ResourceType::Image,
    ResourceType::Media,
];

/// Whether `id` belongs to the low-data mode range
pub fn is_mode_rule(id: RuleId) -> bool {
    (MODE_RULE_BASE + 1..=DOMAIN_RULE_BASE).contains(&id.get())
}

/// Whether `id` belongs to the domain rule range
pub fn is_domain_rule(id: RuleId) -> bool {
    id.get() > DOMAIN_RULE_BASE
}

/// The low-data mode rule set: images (except from localhost) and media
pub fn low_data_rules() -> Vec<Rule> {
    vec![
        Rule {
            id: IMAGE_RULE_ID,
            priority: MODE_RULE_PRIORITY,
            action: RuleAction::block(),
            condition: RuleCondition {
                url_filter: Some("*".to_string()),
                resource_types: vec![ResourceType::Image],
                excluded_domains: Some(vec!["localhost".to_string()]),
                ..RuleCondition::default()
            },
        },
        Rule {
            id: MEDIA_RULE_ID,
            priority: MODE_RULE_PRIORITY,
            action: RuleAction::block(),
            condition: RuleCondition {
                url_filter: Some("*".to_string()),
                resource_types: vec![ResourceType::Media],
                ..RuleCondition::default()
            },
        },
    ]
}

/// Block rule for a single domain
pub fn domain_rule(id: RuleId, domain: &Domain) -> Rule {
    Rule {
        id,
        priority: DOMAIN_RULE_PRIORITY,
        action: RuleAction::block(),
        condition: RuleCondition {
            request_domains: Some(vec![domain.clone()]),
            resource_types: DOMAIN_BLOCKED_RESOURCES.to_vec(),
            ..RuleCondition::default()
        },
    }
}

/// Domain → rule id mapping mirrored in the engine
#[derive(Debug, Clone)]
pub struct DomainRuleTable {
    ids: BTreeMap<Domain, RuleId>,
    next_id: u32,
}

impl Default for DomainRuleTable {
    fn default() -> Self {
        Self {
            ids: BTreeMap::new(),
            next_id: DOMAIN_RULE_BASE + 1,
        }
    }
}

impl DomainRuleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table from the engine's rules
    ///
    /// Returns the table and the ids of domain-range rules that cannot be
    /// mapped back to a single domain (or duplicate another rule's domain);
    /// those should be removed from the engine.
    pub fn from_rules(rules: &[Rule]) -> (Self, Vec<RuleId>) {
        let mut table = Self::new();
        let mut orphans = Vec::new();

        let mut domain_rules: Vec<&Rule> = rules.iter().filter(|r| is_domain_rule(r.id)).collect();
        domain_rules.sort_by_key(|r| r.id);

        for rule in domain_rules {
            table.next_id = table.next_id.max(rule.id.get().saturating_add(1));
            match rule.condition.request_domains.as_deref() {
                Some([domain]) if !table.ids.contains_key(domain) => {
                    table.ids.insert(domain.clone(), rule.id);
                }
                _ => orphans.push(rule.id),
            }
        }

        (table, orphans)
    }

    /// Reserve a fresh id; ids are never handed out twice
    pub fn allocate(&mut self) -> RuleId {
        let id = RuleId::new(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Record that `domain` is blocked by rule `id`
    pub fn insert(&mut self, domain: Domain, id: RuleId) {
        self.ids.insert(domain, id);
    }

    /// Forget `domain`, returning its rule id
    pub fn remove(&mut self, domain: &Domain) -> Option<RuleId> {
        self.ids.remove(domain)
    }

    /// Rule id for `domain`
    pub fn get(&self, domain: &Domain) -> Option<RuleId> {
        self.ids.get(domain).copied()
    }

    /// Domains with a rule, sorted
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.ids.keys()
    }

    /// Number of domain rules
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no domain has a rule
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
