//! Individual validation checks
//!
//! Each check appends to the shared issue list and never stops the others,
//! except that the graph checks need every edge endpoint to exist.

use rustc_hash::FxHashSet;

use super::{ValidationCheck, ValidationIssue};
use crate::ast::{
    FieldDecl, ObjectField, OutputSchemaDecl, ScalarKind, StepConfig, TypeDescriptor, TypeEnv,
    TypeResolver, WorkflowConfig,
};
use crate::binding::extract_placeholders;
use crate::dag::FlowGraph;
use crate::util::{closest_match, is_reserved, is_valid_identifier, END, START};

/// Keywords of the type grammar that a named type may not shadow
const TYPE_KEYWORDS: &[&str] = &["list", "dict", "object", "optional"];

pub(super) struct Report {
    pub issues: Vec<ValidationIssue>,
    /// Parsed state fields (only those whose type parsed)
    pub state_fields: Vec<ObjectField>,
    /// (index into `nodes`, output fields) for steps whose schema parsed
    pub outputs: Vec<(usize, Vec<ObjectField>)>,
    /// Step ids in execution order
    pub order: Vec<String>,
}

impl Report {
    fn push(&mut self, issue: ValidationIssue) {
        if !self.issues.contains(&issue) {
            self.issues.push(issue);
        }
    }
}

pub(super) fn run_all(config: &WorkflowConfig) -> Report {
    let mut report = Report {
        issues: Vec::new(),
        state_fields: Vec::new(),
        outputs: Vec::new(),
        order: Vec::new(),
    };

    check_identifiers(config, &mut report);
    check_types(config, &mut report);
    check_outputs(config, &mut report);
    check_placeholders(config, &mut report);

    if check_edge_references(config, &mut report) {
        let graph = FlowGraph::new(config.step_ids(), &config.edges);
        let before = report.issues.len();
        check_linear_flow(config, &graph, &mut report);
        check_connectivity(config, &graph, &mut report);

        match graph.linear_order() {
            Some(order) if order.len() == config.nodes.len() => {
                report.order = order.iter().map(|id| id.to_string()).collect();
            }
            _ if report.issues.len() == before => {
                report.push(ValidationIssue::new(
                    ValidationCheck::LinearFlow,
                    "edges do not form a single path from START to END",
                ));
            }
            _ => {}
        }
    }

    report
}

// ═══════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════

fn check_identifiers(config: &WorkflowConfig, report: &mut Report) {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    for step in &config.nodes {
        let id = step.id.as_str();
        if is_reserved(id) {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("'{}' is reserved and cannot be a step id", id),
                )
                .with_step(id),
            );
        } else if !is_valid_identifier(id) {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("step id '{}' is not a valid identifier", id),
                )
                .with_step(id),
            );
        }
        if !seen.insert(id) {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("duplicate step id '{}'", id),
                )
                .with_step(id),
            );
        }

        for name in step.inputs.keys() {
            if !is_valid_identifier(name) {
                report.push(
                    ValidationIssue::new(
                        ValidationCheck::Identifiers,
                        format!("input name '{}' is not a valid identifier", name),
                    )
                    .with_step(id)
                    .with_field(format!("inputs.{}", name)),
                );
            }
        }

        let mut outputs: FxHashSet<&str> = FxHashSet::default();
        for output in &step.outputs {
            if !outputs.insert(output) {
                report.push(
                    ValidationIssue::new(
                        ValidationCheck::OutputNames,
                        format!("output '{}' is listed twice", output),
                    )
                    .with_step(id),
                );
            }
        }
    }

    for name in config.state.fields.keys() {
        if !is_valid_identifier(name) {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("state field '{}' is not a valid identifier", name),
                )
                .with_field(format!("state.fields.{}", name)),
            );
        }
    }

    for name in config.types.keys() {
        let shadows = ScalarKind::from_keyword(name).is_some() || TYPE_KEYWORDS.contains(&name);
        if !is_valid_identifier(name) {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("type name '{}' is not a valid identifier", name),
                )
                .with_field(format!("types.{}", name)),
            );
        } else if shadows {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::Identifiers,
                    format!("type name '{}' shadows a built-in type", name),
                )
                .with_field(format!("types.{}", name)),
            );
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Type parsing
// ═══════════════════════════════════════════════════════════════

fn check_types(config: &WorkflowConfig, report: &mut Report) {
    let mut resolver = TypeResolver::new(&config.types);

    for name in config.types.keys() {
        if let Err(e) = resolver.named(name) {
            report.push(
                ValidationIssue::new(ValidationCheck::TypeParse, e.to_string())
                    .with_field(format!("types.{}", name))
                    .with_suggestion(e.suggestion().map(str::to_string)),
            );
        }
    }

    for (name, decl) in config.state.fields.iter() {
        match resolver.resolve_field(decl) {
            Ok(ty) => report.state_fields.push(ObjectField {
                name: name.to_string(),
                ty,
                required: decl.required,
                default: decl.default.clone(),
                description: decl.description.clone(),
            }),
            Err(e) => report.push(
                ValidationIssue::new(
                    ValidationCheck::TypeParse,
                    format!("state field '{}': {}", name, e),
                )
                .with_field(format!("state.fields.{}", name))
                .with_suggestion(e.suggestion().map(str::to_string)),
            ),
        }
    }

    for (index, step) in config.nodes.iter().enumerate() {
        match output_fields(step, &mut resolver) {
            Ok(fields) => report.outputs.push((index, fields)),
            Err(issue) => report.push(issue.with_step(&step.id)),
        }
    }
}

/// Fields of a step's output record.
///
/// A field map is taken as is. A single type string backs a single output;
/// with several outputs it must be an object whose fields are the outputs.
fn output_fields(
    step: &StepConfig,
    resolver: &mut TypeResolver<'_>,
) -> Result<Vec<ObjectField>, ValidationIssue> {
    let parse_issue = |e: crate::ast::TypeParseError| {
        ValidationIssue::new(ValidationCheck::TypeParse, format!("output_schema: {}", e))
            .with_field("output_schema")
            .with_suggestion(e.suggestion().map(str::to_string))
    };

    match &step.output_schema {
        OutputSchemaDecl::Fields(fields) => resolver.resolve_fields(fields).map_err(parse_issue),
        OutputSchemaDecl::Type(text) => {
            let ty = resolver
                .resolve_field(&FieldDecl::of_type(text.as_str()))
                .map_err(parse_issue)?;
            match (step.outputs.as_slice(), ty) {
                ([single], ty) => Ok(vec![ObjectField::new(single.as_str(), ty, true)]),
                (_, TypeDescriptor::Object(fields)) => Ok(fields),
                (_, other) => Err(ValidationIssue::new(
                    ValidationCheck::OutputSchema,
                    format!(
                        "output_schema '{}' is a {} but the step declares {} outputs; use an object or a field map",
                        text,
                        other.kind_name(),
                        step.outputs.len()
                    ),
                )
                .with_field("output_schema")),
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Outputs: names, schema match, type compatibility
// ═══════════════════════════════════════════════════════════════

fn check_outputs(config: &WorkflowConfig, report: &mut Report) {
    let mut issues = Vec::new();

    for (index, step) in config.nodes.iter().enumerate() {
        for output in &step.outputs {
            if !config.state.fields.contains_key(output) {
                issues.push(
                    ValidationIssue::new(
                        ValidationCheck::OutputNames,
                        format!("output '{}' is not a declared state field", output),
                    )
                    .with_step(&step.id)
                    .with_field("outputs")
                    .with_suggestion(closest_match(output, config.state.fields.keys())),
                );
            }
        }

        let Some((_, fields)) = report.outputs.iter().find(|(i, _)| *i == index) else {
            continue;
        };

        for field in fields {
            if !step.outputs.iter().any(|o| *o == field.name) {
                issues.push(
                    ValidationIssue::new(
                        ValidationCheck::OutputSchema,
                        format!("output_schema field '{}' is not a declared output", field.name),
                    )
                    .with_step(&step.id)
                    .with_field("output_schema")
                    .with_suggestion(closest_match(
                        &field.name,
                        step.outputs.iter().map(String::as_str),
                    )),
                );
            }
        }
        for output in &step.outputs {
            if !fields.iter().any(|f| f.name == *output) {
                issues.push(
                    ValidationIssue::new(
                        ValidationCheck::OutputSchema,
                        format!("declared output '{}' is missing from output_schema", output),
                    )
                    .with_step(&step.id)
                    .with_field("output_schema"),
                );
            }
        }

        for field in fields {
            let Some(target) = report.state_fields.iter().find(|s| s.name == field.name) else {
                continue;
            };
            if !field.ty.is_assignable_to(&target.ty) {
                issues.push(
                    ValidationIssue::new(
                        ValidationCheck::TypeCompatibility,
                        format!(
                            "output '{}' is {} but state field '{}' is {}",
                            field.name, field.ty, target.name, target.ty
                        ),
                    )
                    .with_step(&step.id)
                    .with_field(format!("output_schema.{}", field.name)),
                );
            }
        }
    }

    for issue in issues {
        report.push(issue);
    }
}

// ═══════════════════════════════════════════════════════════════
// Placeholders
// ═══════════════════════════════════════════════════════════════

fn check_placeholders(config: &WorkflowConfig, report: &mut Report) {
    let mut issues = Vec::new();
    let declared: Vec<&str> = config.state.fields.keys().collect();

    for step in &config.nodes {
        let scope = StateScope {
            declared: declared.clone(),
            parsed: &report.state_fields,
            writes: &step.outputs,
        };
        for (name, template) in step.inputs.iter() {
            for path in extract_placeholders(template) {
                if let Err(issue) = scope.check(&path, &[]) {
                    issues.push(
                        issue
                            .with_step(&step.id)
                            .with_field(format!("inputs.{}", name)),
                    );
                }
            }
        }

        let inputs: Vec<&str> = step.inputs.keys().collect();
        for path in extract_placeholders(&step.prompt) {
            if let Err(issue) = scope.check(&path, &inputs) {
                issues.push(issue.with_step(&step.id).with_field("prompt"));
            }
        }
    }

    for issue in issues {
        report.push(issue);
    }
}

struct StateScope<'a> {
    declared: Vec<&'a str>,
    parsed: &'a [ObjectField],
    /// Outputs of the step being checked
    writes: &'a [String],
}

impl StateScope<'_> {
    /// Statically walk `path` the way the renderer will at run time
    fn check(&self, path: &str, inputs: &[&str]) -> Result<(), ValidationIssue> {
        let mut segments = path.split('.');
        let head = segments.next().unwrap_or_default();

        if inputs.contains(&head) {
            return match segments.next() {
                None => Ok(()),
                Some(segment) => Err(ValidationIssue::new(
                    ValidationCheck::Placeholders,
                    format!(
                        "cannot access '{}' in '{{{}}}': input '{}' is text",
                        segment, path, head
                    ),
                )),
            };
        }

        let Some(field) = self.parsed.iter().find(|f| f.name == head) else {
            if self.declared.contains(&head) {
                // type did not parse; already reported
                return Ok(());
            }
            return Err(self.unresolved(path, head, inputs));
        };

        let mut current = &field.ty;
        let mut walked = head.to_string();
        for segment in segments {
            match current.member(segment) {
                Some(next) => current = next,
                None => {
                    let names = current.member_names();
                    let message = match current {
                        TypeDescriptor::Object(_) => format!(
                            "'{{{}}}': '{}' has no field '{}'; available: [{}]",
                            path,
                            walked,
                            segment,
                            names.join(", ")
                        ),
                        TypeDescriptor::List(_) => format!(
                            "'{{{}}}': '{}' is a list and '{}' is not an index",
                            path, walked, segment
                        ),
                        other => format!(
                            "'{{{}}}': cannot access '{}' on {} value '{}'",
                            path,
                            segment,
                            other.kind_name(),
                            walked
                        ),
                    };
                    return Err(ValidationIssue::new(ValidationCheck::Placeholders, message)
                        .with_suggestion(closest_match(segment, names)));
                }
            }
            walked.push('.');
            walked.push_str(segment);
        }

        Ok(())
    }

    fn unresolved(&self, path: &str, head: &str, inputs: &[&str]) -> ValidationIssue {
        let suggestion = match path.strip_prefix("state.") {
            Some(rest) if self.check(rest, &[]).is_ok() => Some(rest.to_string()),
            _ => {
                let unwritten = self
                    .declared
                    .iter()
                    .filter(|name| !self.writes.iter().any(|w| w == *name));
                let readable: Vec<&str> = inputs.iter().chain(unwritten).copied().collect();
                closest_match(head, readable.iter().copied()).or_else(|| {
                    match readable.as_slice() {
                        [only] => Some(only.to_string()),
                        _ => None,
                    }
                })
            }
        };
        ValidationIssue::new(
            ValidationCheck::Placeholders,
            format!(
                "unknown variable '{{{}}}'; available inputs: [{}], state: [{}]",
                path,
                inputs.join(", "),
                self.declared.join(", ")
            ),
        )
        .with_suggestion(suggestion)
    }
}

// ═══════════════════════════════════════════════════════════════
// Graph checks
// ═══════════════════════════════════════════════════════════════

/// Returns false when some endpoint is unknown (graph checks are skipped)
fn check_edge_references(config: &WorkflowConfig, report: &mut Report) -> bool {
    let known: Vec<&str> = [START]
        .into_iter()
        .chain(config.step_ids())
        .chain([END])
        .collect();
    let mut resolvable = true;

    for (i, edge) in config.edges.iter().enumerate() {
        for (end, node) in [("from", &edge.from), ("to", &edge.to)] {
            if !known.contains(&node.as_str()) {
                resolvable = false;
                report.push(
                    ValidationIssue::new(
                        ValidationCheck::EdgeReferences,
                        format!("edge {} → {} references unknown node '{}'", edge.from, edge.to, node),
                    )
                    .with_field(format!("edges[{}].{}", i, end))
                    .with_suggestion(closest_match(node, known.iter().copied())),
                );
            }
        }
        if edge.to == START {
            report.push(
                ValidationIssue::new(ValidationCheck::EdgeReferences, "edges cannot enter START")
                    .with_field(format!("edges[{}].to", i)),
            );
        }
        if edge.from == END {
            report.push(
                ValidationIssue::new(ValidationCheck::EdgeReferences, "edges cannot leave END")
                    .with_field(format!("edges[{}].from", i)),
            );
        }
    }

    resolvable
}

fn join(ids: &[std::sync::Arc<str>]) -> String {
    ids.iter().map(|id| id.as_ref()).collect::<Vec<_>>().join(", ")
}

fn check_linear_flow(config: &WorkflowConfig, graph: &FlowGraph, report: &mut Report) {
    if let Err(cycle) = graph.detect_cycles() {
        report.push(ValidationIssue::new(
            ValidationCheck::LinearFlow,
            format!("cycle detected: {}", cycle),
        ));
        return;
    }

    match graph.successors(START) {
        [] => report.push(ValidationIssue::new(
            ValidationCheck::LinearFlow,
            "START has no outgoing edge",
        )),
        [_] => {}
        many => report.push(ValidationIssue::new(
            ValidationCheck::LinearFlow,
            format!("START branches to [{}]; only one successor is allowed", join(many)),
        )),
    }
    match graph.predecessors(END) {
        [] => report.push(ValidationIssue::new(
            ValidationCheck::LinearFlow,
            "no edge reaches END",
        )),
        [_] => {}
        many => report.push(ValidationIssue::new(
            ValidationCheck::LinearFlow,
            format!("END is entered from [{}]; only one predecessor is allowed", join(many)),
        )),
    }

    // zero in/out degree is a connectivity problem, reported there
    for id in config.step_ids() {
        let successors = graph.successors(id);
        if successors.len() > 1 {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::LinearFlow,
                    format!("branches to [{}]; only one successor is allowed", join(successors)),
                )
                .with_step(id),
            );
        }
        let predecessors = graph.predecessors(id);
        if predecessors.len() > 1 {
            report.push(
                ValidationIssue::new(
                    ValidationCheck::LinearFlow,
                    format!(
                        "is entered from [{}]; only one predecessor is allowed",
                        join(predecessors)
                    ),
                )
                .with_step(id),
            );
        }
    }
}

fn check_connectivity(config: &WorkflowConfig, graph: &FlowGraph, report: &mut Report) {
    let from_start = graph.reachable_from_start();
    let to_end = graph.reaching_end();

    for id in config.step_ids() {
        if !from_start.contains(id) {
            report.push(
                ValidationIssue::new(ValidationCheck::Connectivity, "not reachable from START")
                    .with_step(id),
            );
        }
        if !to_end.contains(id) {
            report.push(
                ValidationIssue::new(ValidationCheck::Connectivity, "cannot reach END")
                    .with_step(id),
            );
        }
    }
}
