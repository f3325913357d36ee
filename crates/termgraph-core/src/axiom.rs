//! # Axiom Materializer
//!
//! Converts OWL functional-syntax axioms into grouped relationships and
//! back.
//!
//! Supported forms: `SubClassOf`, `EquivalentClasses`, `ObjectIntersectionOf`,
//! `ObjectSomeValuesFrom`, `DataHasValue`, `SubObjectPropertyOf`,
//! `SubDataPropertyOf`, `TransitiveObjectProperty`, `ReflexiveObjectProperty`
//! and `ObjectPropertyChain`. Class IRIs are `:123` or
//! `<http://snomed.info/id/123>`.
//!
//! Role groups are introduced by `ObjectSomeValuesFrom(:609096000 ...)`;
//! ungrouped attributes and IS-A parents live in group 0.

use crate::primitives;
use crate::types::{
    AxiomId, CharacteristicType, ConceptId, ConcreteKind, ConcreteValue, GraphError, Relationship,
    RelationshipTarget,
};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// TYPES
// =============================================================================

/// One attribute/value pair inside a relationship group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeValue {
    pub type_id: ConceptId,
    pub target: RelationshipTarget,
}

impl AttributeValue {
    #[must_use]
    pub fn isa(parent: ConceptId) -> Self {
        Self {
            type_id: ConceptId(primitives::IS_A),
            target: RelationshipTarget::Concept(parent),
        }
    }

    #[must_use]
    pub fn is_isa(&self) -> bool {
        self.type_id.0 == primitives::IS_A
    }
}

/// Group number → attribute set.
pub type GroupedRelationships = BTreeMap<u16, BTreeSet<AttributeValue>>;

/// A class expression in the supported subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwlTerm {
    Class(ConceptId),
    Intersection(Vec<OwlTerm>),
    SomeValuesFrom {
        property: ConceptId,
        filler: Box<OwlTerm>,
    },
    DataHasValue {
        property: ConceptId,
        value: ConcreteValue,
    },
}

/// A parsed axiom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwlAxiom {
    SubClassOf { sub: OwlTerm, sup: OwlTerm },
    EquivalentClasses { left: OwlTerm, right: OwlTerm },
    SubObjectPropertyOf { sub: ConceptId, sup: ConceptId },
    SubDataPropertyOf { sub: ConceptId, sup: ConceptId },
    TransitiveObjectProperty(ConceptId),
    ReflexiveObjectProperty(ConceptId),
    PropertyChain { chain: Vec<ConceptId>, sup: ConceptId },
}

/// One side of a class axiom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxiomSide {
    Named(ConceptId),
    Expression(GroupedRelationships),
}

/// Which OWL construct a representation renders back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxiomForm {
    Class,
    ObjectProperty,
    DataProperty,
}

/// Left/right-hand sides of a class-like axiom as grouped relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxiomRepresentation {
    pub left: AxiomSide,
    pub right: AxiomSide,
    /// `SubClassOf` (true) vs `EquivalentClasses` (false).
    pub primitive: bool,
    pub form: AxiomForm,
}

/// Axioms that become store-level metadata instead of relationships.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyAxiom {
    Transitive(ConceptId),
    Reflexive(ConceptId),
    Chain { chain: Vec<ConceptId>, sup: ConceptId },
}

/// Result of converting an axiom for a given owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Materialized {
    Class(AxiomRepresentation),
    Property(PropertyAxiom),
}

impl AxiomRepresentation {
    /// General concept inclusion: an anonymous left side included in the
    /// named right side.
    #[must_use]
    pub fn is_gci(&self) -> bool {
        matches!(
            (&self.left, &self.right),
            (AxiomSide::Expression(_), AxiomSide::Named(_))
        )
    }

    /// The concept the axiom belongs to.
    #[must_use]
    pub fn owner(&self) -> Option<ConceptId> {
        match (&self.left, &self.right) {
            (AxiomSide::Named(id), _) | (AxiomSide::Expression(_), AxiomSide::Named(id)) => {
                Some(*id)
            }
            _ => None,
        }
    }

    /// The grouped relationships the axiom contributes.
    #[must_use]
    pub fn groups(&self) -> &GroupedRelationships {
        static EMPTY: GroupedRelationships = BTreeMap::new();
        match (&self.left, &self.right) {
            (_, AxiomSide::Expression(groups)) | (AxiomSide::Expression(groups), _) => groups,
            _ => &EMPTY,
        }
    }

    /// Replace the contributed groups (used after alignment).
    pub fn set_groups(&mut self, groups: GroupedRelationships) {
        if self.is_gci() {
            self.left = AxiomSide::Expression(groups);
        } else {
            self.right = AxiomSide::Expression(groups);
        }
    }

    /// Render back to OWL functional syntax.
    #[must_use]
    pub fn to_expression(&self) -> String {
        let owner = self.owner().map_or_else(String::new, iri);
        match self.form {
            AxiomForm::ObjectProperty | AxiomForm::DataProperty => {
                let keyword = if self.form == AxiomForm::ObjectProperty {
                    "SubObjectPropertyOf"
                } else {
                    "SubDataPropertyOf"
                };
                let parents: Vec<String> = self
                    .groups()
                    .values()
                    .flatten()
                    .filter_map(|av| av.target.concept())
                    .map(iri)
                    .collect();
                format!("{}({} {})", keyword, owner, parents.join(" "))
            }
            AxiomForm::Class if self.is_gci() => {
                format!("SubClassOf({} {})", render_groups(self.groups()), owner)
            }
            AxiomForm::Class => {
                let keyword = if self.primitive {
                    "SubClassOf"
                } else {
                    "EquivalentClasses"
                };
                format!("{}({} {})", keyword, owner, render_groups(self.groups()))
            }
        }
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Ident(String),
    Iri(ConceptId),
    Literal { text: String, datatype: String },
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == ':' {
            let start = i + 1;
            i = start;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            tokens.push(Token::Iri(parse_sctid(&digits)?));
        } else if c == '<' {
            let start = i + 1;
            while i < chars.len() && chars[i] != '>' {
                i += 1;
            }
            if i >= chars.len() {
                return Err("unterminated IRI".to_string());
            }
            let full: String = chars[start..i].iter().collect();
            i += 1;
            let tail = full.rsplit(['/', '#']).next().unwrap_or(&full);
            tokens.push(Token::Iri(parse_sctid(tail)?));
        } else if c == '"' {
            i += 1;
            let mut literal = String::new();
            loop {
                match chars.get(i) {
                    None => return Err("unterminated literal".to_string()),
                    Some('\\') => {
                        if let Some(next) = chars.get(i + 1) {
                            literal.push(*next);
                        }
                        i += 2;
                    }
                    Some('"') => {
                        i += 1;
                        break;
                    }
                    Some(other) => {
                        literal.push(*other);
                        i += 1;
                    }
                }
            }
            let mut datatype = String::from("xsd:string");
            if chars.get(i) == Some(&'^') && chars.get(i + 1) == Some(&'^') {
                i += 2;
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                datatype = chars[start..i].iter().collect();
            }
            tokens.push(Token::Literal {
                text: literal,
                datatype,
            });
        } else if is_ident_char(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return Err(format!("unexpected character '{}'", c));
        }
    }
    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':' || c == '-'
}

fn parse_sctid(text: &str) -> Result<ConceptId, String> {
    text.parse::<u64>()
        .map(ConceptId)
        .map_err(|_| format!("'{}' is not a concept identifier", text))
}

// =============================================================================
// PARSER
// =============================================================================

/// Generic s-expression node built from the token stream.
#[derive(Debug, Clone)]
enum Node {
    Call(String, Vec<Node>),
    Iri(ConceptId),
    Literal { text: String, datatype: String },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn node(&mut self) -> Result<Node, String> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| "unexpected end of expression".to_string())?;
        self.pos += 1;
        match token {
            Token::Iri(id) => Ok(Node::Iri(id)),
            Token::Literal { text, datatype } => Ok(Node::Literal { text, datatype }),
            Token::Ident(name) => {
                if self.tokens.get(self.pos) != Some(&Token::Open) {
                    return Err(format!("expected '(' after {}", name));
                }
                self.pos += 1;
                let mut args = Vec::new();
                loop {
                    match self.tokens.get(self.pos) {
                        Some(Token::Close) => {
                            self.pos += 1;
                            break;
                        }
                        Some(_) => args.push(self.node()?),
                        None => return Err(format!("unclosed {}", name)),
                    }
                }
                Ok(Node::Call(name, args))
            }
            Token::Open | Token::Close => Err("unexpected parenthesis".to_string()),
        }
    }
}

/// Parse an OWL functional-syntax axiom.
pub fn parse_expression(text: &str) -> Result<OwlAxiom, String> {
    let mut parser = Parser {
        tokens: tokenize(text)?,
        pos: 0,
    };
    let root = parser.node()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing input after axiom".to_string());
    }

    let Node::Call(name, args) = root else {
        return Err("axiom must be a constructor call".to_string());
    };

    match (name.as_str(), args.as_slice()) {
        ("SubClassOf", [sub, sup]) => Ok(OwlAxiom::SubClassOf {
            sub: term(sub)?,
            sup: term(sup)?,
        }),
        ("EquivalentClasses", [left, right]) => Ok(OwlAxiom::EquivalentClasses {
            left: term(left)?,
            right: term(right)?,
        }),
        ("SubObjectPropertyOf", [Node::Call(chain, links), sup])
            if chain == "ObjectPropertyChain" =>
        {
            Ok(OwlAxiom::PropertyChain {
                chain: links.iter().map(named).collect::<Result<_, _>>()?,
                sup: named(sup)?,
            })
        }
        ("SubObjectPropertyOf", [sub, sup]) => Ok(OwlAxiom::SubObjectPropertyOf {
            sub: named(sub)?,
            sup: named(sup)?,
        }),
        ("SubDataPropertyOf", [sub, sup]) => Ok(OwlAxiom::SubDataPropertyOf {
            sub: named(sub)?,
            sup: named(sup)?,
        }),
        ("TransitiveObjectProperty", [p]) => Ok(OwlAxiom::TransitiveObjectProperty(named(p)?)),
        ("ReflexiveObjectProperty", [p]) => Ok(OwlAxiom::ReflexiveObjectProperty(named(p)?)),
        (other, args) => Err(format!(
            "unsupported axiom form {} with {} argument(s)",
            other,
            args.len()
        )),
    }
}

fn named(node: &Node) -> Result<ConceptId, String> {
    match node {
        Node::Iri(id) => Ok(*id),
        _ => Err("expected a named entity".to_string()),
    }
}

fn term(node: &Node) -> Result<OwlTerm, String> {
    match node {
        Node::Iri(id) => Ok(OwlTerm::Class(*id)),
        Node::Call(name, args) => match (name.as_str(), args.as_slice()) {
            ("ObjectIntersectionOf", members) if !members.is_empty() => Ok(OwlTerm::Intersection(
                members.iter().map(term).collect::<Result<_, _>>()?,
            )),
            ("ObjectSomeValuesFrom", [property, filler]) => Ok(OwlTerm::SomeValuesFrom {
                property: named(property)?,
                filler: Box::new(term(filler)?),
            }),
            ("DataHasValue", [property, Node::Literal { text, datatype }]) => {
                Ok(OwlTerm::DataHasValue {
                    property: named(property)?,
                    value: literal(text, datatype)?,
                })
            }
            (other, _) => Err(format!("unsupported class expression {}", other)),
        },
        Node::Literal { .. } => Err("literal where a class expression was expected".to_string()),
    }
}

fn literal(text: &str, datatype: &str) -> Result<ConcreteValue, String> {
    let kind = match datatype {
        "xsd:integer" | "xsd:int" | "xsd:long" => ConcreteKind::Integer,
        "xsd:decimal" | "xsd:float" | "xsd:double" => ConcreteKind::Decimal,
        "xsd:string" => ConcreteKind::String,
        other => return Err(format!("unsupported datatype {}", other)),
    };
    if kind != ConcreteKind::String {
        let parsed = ConcreteValue::parse_rf2(&format!("#{}", text))?;
        if kind == ConcreteKind::Integer && parsed.kind != kind {
            return Err(format!("'{}' is not a valid {}", text, datatype));
        }
    }
    Ok(ConcreteValue::new(kind, text))
}

// =============================================================================
// MATERIALIZATION
// =============================================================================

/// Flatten a class expression into grouped relationships.
fn group_term(expression: &OwlTerm) -> Result<GroupedRelationships, String> {
    let members: Vec<&OwlTerm> = match expression {
        OwlTerm::Intersection(members) => members.iter().collect(),
        other => vec![other],
    };

    let mut groups = GroupedRelationships::new();
    let mut next_group: u16 = 1;
    for member in members {
        match member {
            OwlTerm::SomeValuesFrom { property, filler } if property.0 == primitives::ROLE_GROUP => {
                let inner: Vec<&OwlTerm> = match filler.as_ref() {
                    OwlTerm::Intersection(items) => items.iter().collect(),
                    other => vec![other],
                };
                let mut set = BTreeSet::new();
                for item in inner {
                    set.insert(attribute(item)?);
                }
                groups.insert(next_group, set);
                next_group = next_group.saturating_add(1);
            }
            OwlTerm::Class(parent) => {
                groups
                    .entry(0)
                    .or_default()
                    .insert(AttributeValue::isa(*parent));
            }
            other => {
                groups.entry(0).or_default().insert(attribute(other)?);
            }
        }
    }
    Ok(groups)
}

fn attribute(term: &OwlTerm) -> Result<AttributeValue, String> {
    match term {
        OwlTerm::SomeValuesFrom { property, filler } => match filler.as_ref() {
            OwlTerm::Class(target) => Ok(AttributeValue {
                type_id: *property,
                target: RelationshipTarget::Concept(*target),
            }),
            _ => Err(format!("nested expression under attribute {}", property)),
        },
        OwlTerm::DataHasValue { property, value } => Ok(AttributeValue {
            type_id: *property,
            target: RelationshipTarget::Concrete(value.clone()),
        }),
        OwlTerm::Class(id) => Err(format!("bare class {} inside a role group", id)),
        OwlTerm::Intersection(_) => Err("nested intersection".to_string()),
    }
}

fn parent_groups(parent: ConceptId) -> GroupedRelationships {
    let mut groups = GroupedRelationships::new();
    groups.insert(0, BTreeSet::from([AttributeValue::isa(parent)]));
    groups
}

fn class_axiom(
    owner: ConceptId,
    sub: &OwlTerm,
    sup: &OwlTerm,
    primitive: bool,
) -> Result<Materialized, String> {
    let left = match sub {
        OwlTerm::Class(id) => AxiomSide::Named(*id),
        other => AxiomSide::Expression(group_term(other)?),
    };
    let right = match (sup, &left) {
        (OwlTerm::Class(id), AxiomSide::Expression(_)) if *id == owner && primitive => {
            AxiomSide::Named(*id)
        }
        (other, _) => AxiomSide::Expression(group_term(other)?),
    };
    let representation = AxiomRepresentation {
        left,
        right,
        primitive,
        form: AxiomForm::Class,
    };
    match representation.owner() {
        Some(id) if id == owner => Ok(Materialized::Class(representation)),
        _ => Err(format!("axiom does not define concept {}", owner)),
    }
}

fn property_axiom(
    owner: ConceptId,
    sub: ConceptId,
    sup: ConceptId,
    form: AxiomForm,
) -> Result<Materialized, String> {
    if sub != owner {
        return Err(format!("property axiom does not define concept {}", owner));
    }
    Ok(Materialized::Class(AxiomRepresentation {
        left: AxiomSide::Named(sub),
        right: AxiomSide::Expression(parent_groups(sup)),
        primitive: true,
        form,
    }))
}

/// Convert a parsed axiom for the concept that owns it.
///
/// A `SubClassOf` whose left side is anonymous and whose right side names
/// the owner is a GCI.
pub fn to_representation(owner: ConceptId, axiom: &OwlAxiom) -> Result<Materialized, String> {
    match axiom {
        OwlAxiom::SubClassOf { sub, sup } => class_axiom(owner, sub, sup, true),
        OwlAxiom::EquivalentClasses { left, right } => class_axiom(owner, left, right, false),
        OwlAxiom::SubObjectPropertyOf { sub, sup } => {
            property_axiom(owner, *sub, *sup, AxiomForm::ObjectProperty)
        }
        OwlAxiom::SubDataPropertyOf { sub, sup } => {
            property_axiom(owner, *sub, *sup, AxiomForm::DataProperty)
        }
        OwlAxiom::TransitiveObjectProperty(p) => {
            Ok(Materialized::Property(PropertyAxiom::Transitive(*p)))
        }
        OwlAxiom::ReflexiveObjectProperty(p) => {
            Ok(Materialized::Property(PropertyAxiom::Reflexive(*p)))
        }
        OwlAxiom::PropertyChain { chain, sup } => Ok(Materialized::Property(PropertyAxiom::Chain {
            chain: chain.clone(),
            sup: *sup,
        })),
    }
}

/// Parse and convert in one step, reporting failures as conversion errors.
pub fn materialize(
    owner: ConceptId,
    axiom_id: &AxiomId,
    expression: &str,
) -> Result<Materialized, GraphError> {
    parse_expression(expression)
        .and_then(|axiom| to_representation(owner, &axiom))
        .map_err(|reason| GraphError::Conversion {
            concept: owner,
            axiom: axiom_id.to_string(),
            reason,
        })
}

// =============================================================================
// GROUP ALIGNMENT
// =============================================================================

/// Renumber new groups so that a group whose attribute set exactly matches
/// a previous group keeps that group's number; every other group gets the
/// lowest number that is neither reserved nor already assigned. `reserved`
/// holds the numbers in use by the concept's other stated relationships.
/// Group 0 is never renumbered.
#[must_use]
pub fn align_groups(
    new_groups: &GroupedRelationships,
    previous_groups: &GroupedRelationships,
    reserved: &BTreeSet<u16>,
) -> GroupedRelationships {
    let mut aligned = GroupedRelationships::new();
    let mut claimed: BTreeSet<u16> = reserved.iter().copied().filter(|n| *n != 0).collect();
    let mut pending: Vec<&BTreeSet<AttributeValue>> = Vec::new();

    if let Some(ungrouped) = new_groups.get(&0) {
        aligned.insert(0, ungrouped.clone());
    }

    for (_, set) in new_groups.iter().filter(|(n, s)| **n != 0 && !s.is_empty()) {
        let reuse = previous_groups
            .iter()
            .find(|(number, previous)| **number != 0 && !claimed.contains(number) && *previous == set)
            .map(|(number, _)| *number);
        match reuse {
            Some(number) => {
                claimed.insert(number);
                aligned.insert(number, set.clone());
            }
            None => pending.push(set),
        }
    }

    let mut candidate: u16 = 1;
    for set in pending {
        while claimed.contains(&candidate) {
            candidate = candidate.saturating_add(1);
        }
        claimed.insert(candidate);
        aligned.insert(candidate, set.clone());
    }
    aligned
}

/// Rebuild the grouped structure from materialized relationships.
#[must_use]
pub fn group_relationships<'a>(
    relationships: impl IntoIterator<Item = &'a Relationship>,
) -> GroupedRelationships {
    let mut groups = GroupedRelationships::new();
    for r in relationships {
        groups.entry(r.group).or_default().insert(AttributeValue {
            type_id: r.type_id,
            target: r.target.clone(),
        });
    }
    groups
}

/// Active stated relationships of a concept grouped by group number.
#[must_use]
pub fn stated_groups(relationships: &[Relationship]) -> GroupedRelationships {
    group_relationships(
        relationships
            .iter()
            .filter(|r| r.active && r.characteristic_type == CharacteristicType::Stated),
    )
}

// =============================================================================
// RENDERING
// =============================================================================

fn iri(id: ConceptId) -> String {
    format!(":{}", id)
}

fn render_attribute(av: &AttributeValue) -> String {
    match &av.target {
        RelationshipTarget::Concept(target) => {
            format!("ObjectSomeValuesFrom({} {})", iri(av.type_id), iri(*target))
        }
        RelationshipTarget::Concrete(value) => {
            let datatype = match value.kind {
                ConcreteKind::Integer => "xsd:integer",
                ConcreteKind::Decimal => "xsd:decimal",
                ConcreteKind::String => "xsd:string",
            };
            let escaped = value.literal.replace('\\', "\\\\").replace('"', "\\\"");
            format!(
                "DataHasValue({} \"{}\"^^{})",
                iri(av.type_id),
                escaped,
                datatype
            )
        }
    }
}

fn intersection(mut members: Vec<String>) -> String {
    if members.len() == 1 {
        members.remove(0)
    } else {
        format!("ObjectIntersectionOf({})", members.join(" "))
    }
}

fn render_groups(groups: &GroupedRelationships) -> String {
    let mut members = Vec::new();
    if let Some(ungrouped) = groups.get(&0) {
        members.extend(
            ungrouped
                .iter()
                .filter(|av| av.is_isa())
                .filter_map(|av| av.target.concept())
                .map(iri),
        );
        members.extend(
            ungrouped
                .iter()
                .filter(|av| !av.is_isa())
                .map(render_attribute),
        );
    }
    for (_, set) in groups.iter().filter(|(n, s)| **n != 0 && !s.is_empty()) {
        let inner = intersection(set.iter().map(render_attribute).collect());
        members.push(format!(
            "ObjectSomeValuesFrom({} {})",
            iri(ConceptId(primitives::ROLE_GROUP)),
            inner
        ));
    }
    intersection(members)
}

// =============================================================================
// TESTS
// =============================================================================
