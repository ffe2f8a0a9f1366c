//! Named-type resolution
//!
//! Turns `FieldDecl`s into `ObjectField`s, resolving references to
//! `types:` declarations. A name reached again while it is still being
//! resolved is a cycle (`A -> list[B] -> A`).

use rustc_hash::FxHashMap;

use super::types::{parse_type_in, ObjectField, TypeDescriptor, TypeEnv, TypeParseError};
use super::workflow::{FieldDecl, FieldMap, OrderedMap};

pub struct TypeResolver<'d> {
    decls: &'d OrderedMap<FieldMap>,
    resolved: FxHashMap<String, TypeDescriptor>,
    stack: Vec<String>,
}

impl<'d> TypeResolver<'d> {
    pub fn new(decls: &'d OrderedMap<FieldMap>) -> Self {
        Self {
            decls,
            resolved: FxHashMap::default(),
            stack: Vec::new(),
        }
    }

    /// Descriptor for one declaration (`fields:` backs a bare `object`)
    pub fn resolve_field(&mut self, decl: &FieldDecl) -> Result<TypeDescriptor, TypeParseError> {
        let bare = match &decl.fields {
            Some(fields) => Some(self.resolve_fields(fields)?),
            None => None,
        };
        parse_type_in(&decl.type_name, bare.as_deref(), self)
    }

    pub fn resolve_fields(&mut self, fields: &FieldMap) -> Result<Vec<ObjectField>, TypeParseError> {
        fields
            .iter()
            .map(|(name, decl)| {
                Ok(ObjectField {
                    name: name.to_string(),
                    ty: self.resolve_field(decl)?,
                    required: decl.required,
                    default: decl.default.clone(),
                    description: decl.description.clone(),
                })
            })
            .collect()
    }
}

impl TypeEnv for TypeResolver<'_> {
    fn named(&mut self, name: &str) -> Result<Option<TypeDescriptor>, TypeParseError> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(Some(done.clone()));
        }
        let decls = self.decls;
        let Some(fields) = decls.get(name) else {
            return Ok(None);
        };

        if let Some(pos) = self.stack.iter().position(|n| n == name) {
            let mut cycle: Vec<&str> = self.stack[pos..].iter().map(String::as_str).collect();
            cycle.push(name);
            return Err(TypeParseError::Cycle {
                name: name.to_string(),
                cycle: cycle.join(" → "),
            });
        }

        self.stack.push(name.to_string());
        let fields = self.resolve_fields(fields);
        self.stack.pop();

        let descriptor = TypeDescriptor::Object(fields?);
        self.resolved.insert(name.to_string(), descriptor.clone());
        Ok(Some(descriptor))
    }

    fn names(&self) -> Vec<String> {
        self.decls.keys().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decls(pairs: &[(&str, &[(&str, &str)])]) -> OrderedMap<FieldMap> {
        OrderedMap::from_pairs(
            pairs
                .iter()
                .map(|(name, fields)| {
                    let map = OrderedMap::from_pairs(
                        fields
                            .iter()
                            .map(|(f, t)| {
                                let mut decl = FieldDecl::of_type(*t);
                                decl.required = true;
                                (f.to_string(), decl)
                            })
                            .collect(),
                    );
                    (name.to_string(), map)
                })
                .collect(),
        )
    }

    #[test]
    fn test_resolves_named_types() {
        let types = decls(&[
            ("Source", &[("url", "str"), ("title", "str")]),
            ("Report", &[("sources", "list[Source]")]),
        ]);
        let mut resolver = TypeResolver::new(&types);
        let t = resolver.resolve_field(&FieldDecl::of_type("Report")).unwrap();
        assert_eq!(t.to_string(), "object{sources:list[object{url:str,title:str}]}");
    }

    #[test]
    fn test_detects_indirect_cycle() {
        let types = decls(&[("A", &[("b", "list[B]")]), ("B", &[("a", "A")])]);
        let mut resolver = TypeResolver::new(&types);
        let err = resolver.resolve_field(&FieldDecl::of_type("A")).unwrap_err();
        match err {
            TypeParseError::Cycle { cycle, .. } => assert_eq!(cycle, "A → B → A"),
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_detects_self_reference() {
        let types = decls(&[("Node", &[("children", "list[Node]")])]);
        let mut resolver = TypeResolver::new(&types);
        assert!(matches!(
            resolver.resolve_field(&FieldDecl::of_type("Node")),
            Err(TypeParseError::Cycle { .. })
        ));
    }

    #[test]
    fn test_bare_object_with_fields() {
        let types = OrderedMap::default();
        let mut resolver = TypeResolver::new(&types);
        let mut decl = FieldDecl::of_type("object");
        decl.fields = Some(OrderedMap::from_pairs(vec![(
            "score".to_string(),
            FieldDecl::of_type("float"),
        )]));
        let t = resolver.resolve_field(&decl).unwrap();
        assert_eq!(t.to_string(), "object{score?:float}");
    }
}
