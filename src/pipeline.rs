//! Running both transformations over a configuration.
use crate::{
    config::Config,
    exposition::{
        self,
        Encoder,
    },
    promql::{
        self,
        Tree,
    },
    Error,
};
use std::io::Write;
use tracing::debug;

/// How enforced expressions are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Render {
    /// One canonical PromQL line per expression
    #[default]
    Expr,
    /// The node tree of each expression
    Tree,
}

/// Enforce the labels on every expression and print it, print a blank line, then append the
/// labels to the metrics and print them as exposition text.
///
/// Nothing is written for an expression that does not parse, and the run stops there.
pub fn run<W: Write>(config: &Config, render: Render, out: &mut W) -> Result<(), Error> {
    let enforcer = config.enforcer();

    for query in &config.expressions {
        let mut expr = promql::parse(query)?;
        enforcer.enforce(&mut expr);
        debug!(%query, enforced = %expr, "Enforced expression");
        match render {
            Render::Expr => writeln!(out, "{expr}")?,
            Render::Tree => write!(out, "{}", Tree(&expr))?,
        }
    }
    writeln!(out)?;

    let mut families = exposition::decode(&config.metrics)?;
    debug!(count = families.len(), "Decoded metric families");
    exposition::add_labels(&mut families, &enforcer.labels().to_labels());

    let mut encoder = Encoder::new(out);
    for family in &families {
        encoder.encode(family)?;
    }
    Ok(())
}
