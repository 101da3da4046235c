//! ArchiMate 3.2 reference catalog: element types, relationship types and
//! the layering rules between them. Read-only; consulted by validation,
//! queries and reports through [`MetamodelCatalog`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ElementType {
    pub name: &'static str,
    pub layer: &'static str,
    pub aspect: &'static str,
    pub definition: &'static str,
}

impl ElementType {
    const fn new(
        name: &'static str,
        layer: &'static str,
        aspect: &'static str,
        definition: &'static str,
    ) -> Self {
        Self { name, layer, aspect, definition }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RelationshipType {
    pub name: &'static str,
    pub category: &'static str,
    pub directed: bool,
    pub definition: &'static str,
}

impl RelationshipType {
    const fn new(
        name: &'static str,
        category: &'static str,
        directed: bool,
        definition: &'static str,
    ) -> Self {
        Self { name, category, directed, definition }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LayeringRule {
    pub rule_type: &'static str,
    pub source: &'static str,
    pub relationship: &'static str,
    pub target: &'static str,
    pub notes: &'static str,
}

impl LayeringRule {
    const fn new(
        rule_type: &'static str,
        source: &'static str,
        relationship: &'static str,
        target: &'static str,
        notes: &'static str,
    ) -> Self {
        Self { rule_type, source, relationship, target, notes }
    }
}

/// Type-name lookups used by the validator, the query engine and reports.
/// Lookups are case-insensitive.
pub trait MetamodelCatalog: Send + Sync {
    fn lookup_element_type(&self, name: &str) -> Option<ElementType>;
    fn lookup_relationship_type(&self, name: &str) -> Option<RelationshipType>;
    fn element_types(&self) -> &[ElementType];
    fn relationship_types(&self) -> &[RelationshipType];
    fn layering_rules(&self) -> &[LayeringRule];
}

/// The built-in ArchiMate 3.2 table.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchimateCatalog;

impl MetamodelCatalog for ArchimateCatalog {
    fn lookup_element_type(&self, name: &str) -> Option<ElementType> {
        let name = name.trim();
        ELEMENT_TYPES
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .copied()
    }

    fn lookup_relationship_type(&self, name: &str) -> Option<RelationshipType> {
        let name = name.trim();
        RELATIONSHIP_TYPES
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .copied()
    }

    fn element_types(&self) -> &[ElementType] {
        ELEMENT_TYPES
    }

    fn relationship_types(&self) -> &[RelationshipType] {
        RELATIONSHIP_TYPES
    }

    fn layering_rules(&self) -> &[LayeringRule] {
        LAYERING_RULES
    }
}

pub const ELEMENT_TYPES: &[ElementType] = &[
    ElementType::new("Resource", "Strategy", "Passive Structure", "An asset owned or controlled by an organization."),
    ElementType::new("Capability", "Strategy", "Behavior", "An ability that an active structure element possesses."),
    ElementType::new("Value Stream", "Strategy", "Behavior", "A sequence of activities that creates an overall result for a customer or stakeholder."),
    ElementType::new("Course of Action", "Strategy", "Active Structure", "An approach or plan for configuring capabilities and resources."),
    ElementType::new("Business Actor", "Business", "Active Structure", "An organizational entity capable of performing behavior."),
    ElementType::new("Business Role", "Business", "Active Structure", "The responsibility for performing specific behavior."),
    ElementType::new("Business Collaboration", "Business", "Active Structure", "An aggregate of two or more business internal active structure elements."),
    ElementType::new("Business Interface", "Business", "Active Structure", "A point of access where business services are made available."),
    ElementType::new("Business Process", "Business", "Behavior", "A sequence of business behaviors that achieves a specific result."),
    ElementType::new("Business Function", "Business", "Behavior", "A collection of business behavior based on a chosen set of criteria."),
    ElementType::new("Business Interaction", "Business", "Behavior", "A unit of behavior performed by a collaboration of two or more roles."),
    ElementType::new("Business Event", "Business", "Behavior", "A business behavior element that denotes a state change."),
    ElementType::new("Business Service", "Business", "Behavior", "Explicitly defined business behavior exposed to the environment."),
    ElementType::new("Business Object", "Business", "Passive Structure", "A concept used within a particular business domain."),
    ElementType::new("Contract", "Business", "Passive Structure", "A formal or informal specification of an agreement."),
    ElementType::new("Representation", "Business", "Passive Structure", "A perceptible form of the information carried by a business object."),
    ElementType::new("Product", "Business", "Composite", "A coherent collection of services and associated contract/value offered as a whole."),
    ElementType::new("Application Component", "Application", "Active Structure", "A modular, deployable, and replaceable part of a software system."),
    ElementType::new("Application Collaboration", "Application", "Active Structure", "An aggregate of two or more application components that work together."),
    ElementType::new("Application Interface", "Application", "Active Structure", "A point of access where application services are made available."),
    ElementType::new("Application Function", "Application", "Behavior", "Automated behavior that can be performed by an application component."),
    ElementType::new("Application Interaction", "Application", "Behavior", "A unit of collective application behavior performed by a collaboration."),
    ElementType::new("Application Process", "Application", "Behavior", "A sequence of application behavior that achieves a specific result."),
    ElementType::new("Application Event", "Application", "Behavior", "An application behavior element that denotes a state change."),
    ElementType::new("Application Service", "Application", "Behavior", "An explicitly defined exposed application behavior."),
    ElementType::new("Data Object", "Application", "Passive Structure", "Data suitable for automated processing."),
    ElementType::new("Node", "Technology", "Active Structure", "A computational or physical resource that hosts software or artifacts."),
    ElementType::new("Device", "Technology", "Active Structure", "A physical IT resource upon which artifacts can be deployed."),
    ElementType::new("System Software", "Technology", "Active Structure", "A software environment for specific types of components and objects."),
    ElementType::new("Technology Collaboration", "Technology", "Active Structure", "An aggregate of two or more internal active structure technology elements."),
    ElementType::new("Technology Interface", "Technology", "Active Structure", "A point of access where technology services are made available."),
    ElementType::new("Path", "Technology", "Active Structure", "A link between two or more nodes through which data or material can flow."),
    ElementType::new("Communication Network", "Technology", "Active Structure", "A set of structures that connects nodes for transmission."),
    ElementType::new("Technology Function", "Technology", "Behavior", "A collection of technology behavior based on a chosen set of criteria."),
    ElementType::new("Technology Process", "Technology", "Behavior", "A sequence of technology behavior that achieves a specific result."),
    ElementType::new("Technology Interaction", "Technology", "Behavior", "A unit of collective technology behavior performed by collaboration."),
    ElementType::new("Technology Event", "Technology", "Behavior", "A technology behavior element that denotes a state change."),
    ElementType::new("Technology Service", "Technology", "Behavior", "An explicitly defined exposed technology behavior."),
    ElementType::new("Artifact", "Technology", "Passive Structure", "A physical piece of data that can be used or produced in development/deployment."),
    ElementType::new("Equipment", "Physical", "Active Structure", "One or more physical machines, tools, or instruments."),
    ElementType::new("Facility", "Physical", "Active Structure", "A physical structure or environment."),
    ElementType::new("Distribution Network", "Physical", "Active Structure", "A physical network used to transport materials or energy."),
    ElementType::new("Material", "Physical", "Passive Structure", "Tangible physical matter or energy."),
    ElementType::new("Stakeholder", "Motivation", "Motivation", "A role of an individual, team, or organization representing interests."),
    ElementType::new("Driver", "Motivation", "Motivation", "An internal or external condition that motivates change."),
    ElementType::new("Assessment", "Motivation", "Motivation", "The outcome of an analysis of a state of affairs."),
    ElementType::new("Goal", "Motivation", "Motivation", "A high-level statement of intent, direction, or desired end state."),
    ElementType::new("Outcome", "Motivation", "Motivation", "An end result produced by behavior or capabilities."),
    ElementType::new("Principle", "Motivation", "Motivation", "A qualitative statement of intent to guide behavior and design."),
    ElementType::new("Requirement", "Motivation", "Motivation", "A statement of need that must be realized by a system."),
    ElementType::new("Constraint", "Motivation", "Motivation", "A restriction on how a system is realized or behavior is performed."),
    ElementType::new("Meaning", "Motivation", "Motivation", "The knowledge or expertise present in a concept."),
    ElementType::new("Value", "Motivation", "Motivation", "The relative worth, utility, or importance of a concept."),
    ElementType::new("Work Package", "Implementation & Migration", "Behavior", "A series of actions identified and designed to achieve specific results."),
    ElementType::new("Deliverable", "Implementation & Migration", "Passive Structure", "A precisely-defined outcome of a work package."),
    ElementType::new("Implementation Event", "Implementation & Migration", "Behavior", "A state change related to implementation or migration."),
    ElementType::new("Plateau", "Implementation & Migration", "Passive Structure", "A relatively stable state of architecture at a point in time."),
    ElementType::new("Gap", "Implementation & Migration", "Passive Structure", "A statement of difference between two plateaus."),
    ElementType::new("Location", "Cross-Layer", "Composite", "A conceptual or physical place where structure elements can be assigned."),
    ElementType::new("Grouping", "Cross-Layer", "Composite", "An arbitrary aggregation of concepts for convenience."),
    ElementType::new("Junction", "Cross-Layer", "Relationship Connector", "A connector used to model logical AND/OR combinations of relationships."),
];

pub const RELATIONSHIP_TYPES: &[RelationshipType] = &[
    RelationshipType::new("Composition", "Structural", true, "Indicates that an element consists of one or more other concepts."),
    RelationshipType::new("Aggregation", "Structural", true, "Indicates that an element groups one or more other concepts."),
    RelationshipType::new("Assignment", "Structural", true, "Links active structure elements to behavior they perform, own, or are responsible for."),
    RelationshipType::new("Realization", "Structural", true, "Indicates that one concept makes another concept real."),
    RelationshipType::new("Serving", "Dependency", true, "Indicates that an element provides functionality to another element."),
    RelationshipType::new("Access", "Dependency", true, "Indicates ability of behavior/active elements to read and/or write passive structure elements."),
    RelationshipType::new("Influence", "Dependency", true, "Indicates that an element affects implementation or achievement of another element."),
    RelationshipType::new("Triggering", "Dynamic", true, "Indicates temporal or causal precedence between elements."),
    RelationshipType::new("Flow", "Dynamic", true, "Indicates transfer from one element to another."),
    RelationshipType::new("Specialization", "Other", true, "Indicates that one element is a more specific form of another."),
    RelationshipType::new("Association", "Other", false, "A generic relationship between elements not covered by other relation types."),
];

pub const LAYERING_RULES: &[LayeringRule] = &[
    LayeringRule::new("layering", "Business", "Serving", "Application", "Application services may serve business behavior/elements."),
    LayeringRule::new("layering", "Application", "Serving", "Technology", "Technology services may serve application behavior/elements."),
    LayeringRule::new("structural", "Active Structure", "Assignment", "Behavior", "Active structure elements can be assigned to behavior."),
    LayeringRule::new("structural", "Behavior", "Access", "Passive Structure", "Behavior can access passive structure elements."),
    LayeringRule::new("motivation", "Driver", "Influence", "Goal", "Drivers can influence goals and requirements."),
    LayeringRule::new("implementation", "Work Package", "Realization", "Deliverable", "Work packages realize deliverables."),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_sizes() {
        assert_eq!(ELEMENT_TYPES.len(), 61);
        assert_eq!(RELATIONSHIP_TYPES.len(), 11);
        assert_eq!(LAYERING_RULES.len(), 6);
    }

    #[test]
    fn lookups_ignore_case() {
        let catalog = ArchimateCatalog;
        let actor = catalog.lookup_element_type("business actor").unwrap();
        assert_eq!(actor.layer, "Business");
        assert_eq!(actor.aspect, "Active Structure");

        let assoc = catalog.lookup_relationship_type("ASSOCIATION").unwrap();
        assert_eq!(assoc.category, "Other");
        assert!(!assoc.directed);

        assert!(catalog.lookup_element_type("Widget").is_none());
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<&str> = ELEMENT_TYPES.iter().map(|t| t.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ELEMENT_TYPES.len());
    }
}
