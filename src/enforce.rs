//! Forcing label matchers onto PromQL selectors.
//!
//! ```
//! use prom_label_enforcer::{
//!     enforce::{EnforcedLabels, LabelEnforcer},
//!     promql,
//! };
//!
//! let labels = EnforcedLabels::from_iter([("app", "app"), ("region", "cn")]);
//! let enforcer = LabelEnforcer::with_defaults(labels);
//! let mut expr = promql::parse(r#"up{app=""}"#).unwrap();
//! enforcer.enforce(&mut expr);
//! assert_eq!(expr.to_string(), r#"up{app="app",region="cn"}"#);
//! ```
use crate::{
    exposition::Label,
    promql::{
        Expr,
        MatchType,
        Matcher,
    },
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::{
    BTreeMap,
    HashMap,
};
use tracing::{
    debug,
    trace,
};

/// The label pairs every selector and every sample must carry, ordered by name.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    derive_more::Deref,
    derive_more::From,
)]
#[serde(transparent)]
pub struct EnforcedLabels(BTreeMap<String, String>);

impl EnforcedLabels {
    /// The pairs as exposition labels, in name order.
    pub fn to_labels(&self) -> Vec<Label> {
        self.0
            .iter()
            .map(|(key, value)| Label::new(key.clone(), value.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnforcedLabels {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

/// What happens to an existing matcher on an enforced label name.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchPolicy {
    /// Only the value is replaced, `container=~"x"` stays a regex match.
    #[default]
    Preserve,
    /// The matcher becomes an equality matcher.
    ForceEqual,
}

/// Which selectors of an expression are enforced.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Traversal {
    /// Every selector in the tree.
    #[default]
    Recursive,
    /// Only a selector that is the whole expression.
    RootOnly,
}

/// Rewrites selector matchers so that they pin the enforced labels.
#[derive(Debug, Clone, derive_more::Constructor)]
pub struct LabelEnforcer {
    labels: EnforcedLabels,
    policy: MatchPolicy,
    traversal: Traversal,
}

impl LabelEnforcer {
    pub fn with_defaults(labels: EnforcedLabels) -> Self {
        Self::new(labels, MatchPolicy::default(), Traversal::default())
    }

    pub fn labels(&self) -> &EnforcedLabels {
        &self.labels
    }

    /// Enforce the labels on the selectors of `expr`, in place.
    pub fn enforce(&self, expr: &mut Expr) {
        match self.traversal {
            Traversal::Recursive => expr.walk_mut(&mut |node| {
                if let Some(matchers) = node.matchers_mut() {
                    self.enforce_matchers(matchers);
                }
            }),
            Traversal::RootOnly => match expr.matchers_mut() {
                Some(matchers) => self.enforce_matchers(matchers),
                None => {
                    let kind: &str = expr.as_ref();
                    debug!(kind, "Root is not a selector, left untouched");
                }
            },
        }
    }

    /// Enforce the labels on the matchers of a single selector.
    ///
    /// An existing matcher on an enforced name gets the enforced value. When a name appears
    /// more than once, the last matcher is the one rewritten. Missing names are appended as
    /// equality matchers, in name order.
    pub fn enforce_matchers(&self, matchers: &mut Vec<Matcher>) {
        let positions: HashMap<String, usize> = matchers
            .iter()
            .enumerate()
            .map(|(idx, matcher)| (matcher.name.clone(), idx))
            .collect();

        for (name, value) in self.labels.iter() {
            match positions.get(name) {
                Some(&idx) => {
                    let matcher = &mut matchers[idx];
                    debug!(
                        label = name.as_str(),
                        from = matcher.value.as_str(),
                        to = value.as_str(),
                        "Overwriting matcher value"
                    );
                    matcher.value.clone_from(value);
                    if self.policy == MatchPolicy::ForceEqual {
                        matcher.match_type = MatchType::Equal;
                    }
                }
                None => {
                    trace!(label = name.as_str(), value = value.as_str(), "Appending matcher");
                    matchers.push(Matcher::equal(name.as_str(), value.as_str()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EnforcedLabels,
        LabelEnforcer,
        MatchPolicy,
        Traversal,
    };
    use crate::{
        exposition::Label,
        promql::{
            self,
            Expr,
            MatchType,
            Matcher,
        },
        tests::init_test_logging,
    };
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn labels() -> EnforcedLabels {
        EnforcedLabels::from_iter([("region", "cn"), ("app", "app")])
    }

    fn enforced(query: &str, policy: MatchPolicy, traversal: Traversal) -> String {
        let mut expr = promql::parse(query).unwrap();
        LabelEnforcer::new(labels(), policy, traversal).enforce(&mut expr);
        expr.to_string()
    }

    #[test]
    fn test_labels_are_ordered_by_name() {
        assert_eq!(
            labels().to_labels(),
            vec![Label::new("app".into(), "app".into()), Label::new("region".into(), "cn".into())]
        );
    }

    #[rstest]
    #[case(
        r#"container_cpu_usage_seconds_total{app="",namespace="kube-system",container=~".*apiserver.*"}[5m]"#,
        r#"container_cpu_usage_seconds_total{app="app",namespace="kube-system",container=~".*apiserver.*",region="cn"}[5m]"#
    )]
    #[case(
        r#"container_cpu_usage_seconds_total{namespace="kube-system",container=~".*apiserver.*"}[5m]"#,
        r#"container_cpu_usage_seconds_total{namespace="kube-system",container=~".*apiserver.*",app="app",region="cn"}[5m]"#
    )]
    #[case("up", r#"up{app="app",region="cn"}"#)]
    #[case(r#"up{region!~"eu.*"}"#, r#"up{region!~"cn",app="app"}"#)]
    #[case(
        r#"sum by(job) (rate(a[5m])) / on(job) b{x="y"}"#,
        r#"sum by(job) (rate(a{app="app",region="cn"}[5m])) / on(job) b{x="y",app="app",region="cn"}"#
    )]
    #[case(
        "topk(3, -a offset 1m) or vector(1)",
        r#"topk(3, -a{app="app",region="cn"} offset 1m) or vector(1)"#
    )]
    #[case("1 + 2", "1 + 2")]
    fn test_enforce_preserve(#[case] query: &str, #[case] expected: &str) {
        init_test_logging();

        assert_eq!(
            enforced(query, MatchPolicy::Preserve, Traversal::Recursive),
            expected
        );
    }

    #[test]
    fn test_enforce_force_equal() {
        init_test_logging();

        assert_eq!(
            enforced(
                r#"up{app=~"a|b",region!="eu"}"#,
                MatchPolicy::ForceEqual,
                Traversal::Recursive
            ),
            r#"up{app="app",region="cn"}"#
        );
    }

    #[test]
    fn test_root_only() {
        init_test_logging();

        let query = r#"a + b{app="x"}"#;
        assert_eq!(enforced(query, MatchPolicy::Preserve, Traversal::RootOnly), query);
        assert_eq!(
            enforced("a[1m]", MatchPolicy::Preserve, Traversal::RootOnly),
            r#"a{app="app",region="cn"}[1m]"#
        );
    }

    #[rstest]
    fn test_enforce_is_idempotent(
        #[values(MatchPolicy::Preserve, MatchPolicy::ForceEqual)] policy: MatchPolicy,
        #[values(
            r#"up{app="",app="other"}"#,
            r#"sum(rate(x{region=~".+"}[5m])) > bool 3"#,
            r#"label_replace({__name__="up"}, "a", "$1", "b", "(.*)")"#
        )]
        query: &str,
    ) {
        init_test_logging();

        let enforcer = LabelEnforcer::new(labels(), policy, Traversal::Recursive);
        let mut once = promql::parse(query).unwrap();
        enforcer.enforce(&mut once);
        let mut twice = once.clone();
        enforcer.enforce(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_every_selector_carries_every_label() {
        init_test_logging();

        let mut expr = promql::parse(
            r#"histogram_quantile(0.9, sum by(le) (rate(x_bucket{app="a"}[5m]))) / ignoring(le) y"#,
        )
        .unwrap();
        LabelEnforcer::with_defaults(labels()).enforce(&mut expr);

        let mut selectors = 0;
        expr.walk(&mut |node: &Expr| {
            let Some(matchers) = node.matchers() else {
                return;
            };
            selectors += 1;
            for (name, value) in labels().iter() {
                assert!(matchers.iter().any(|matcher| &matcher.name == name && &matcher.value == value));
            }
        });
        assert_eq!(selectors, 2);
    }

    #[test]
    fn test_duplicate_names_rewrite_the_last() {
        init_test_logging();

        let mut matchers = vec![
            Matcher::equal("app", "first"),
            Matcher::new(MatchType::NotEqual, "app".into(), "second".into()),
        ];
        LabelEnforcer::with_defaults(labels()).enforce_matchers(&mut matchers);
        assert_eq!(
            matchers,
            vec![
                Matcher::equal("app", "first"),
                Matcher::new(MatchType::NotEqual, "app".into(), "app".into()),
                Matcher::equal("region", "cn"),
            ]
        );
    }

    #[test]
    fn test_empty_labels_are_a_no_op() {
        init_test_logging();

        let mut matchers = vec![Matcher::equal("job", "api")];
        LabelEnforcer::with_defaults(EnforcedLabels::default()).enforce_matchers(&mut matchers);
        assert_eq!(matchers, vec![Matcher::equal("job", "api")]);
    }
}
