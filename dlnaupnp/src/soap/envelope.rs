//! Structures de l'enveloppe SOAP

use xmltree::{Element, XMLNode};

/// Enveloppe SOAP complète
#[derive(Debug, Clone)]
pub struct SoapEnvelope {
    /// En-tête SOAP optionnel
    pub header: Option<SoapHeader>,

    /// Corps SOAP contenant la réponse ou le fault
    pub body: SoapBody,
}

/// En-tête SOAP
#[derive(Debug, Clone)]
pub struct SoapHeader {
    pub content: Element,
}

/// Corps SOAP
#[derive(Debug, Clone)]
pub struct SoapBody {
    pub content: Element,
}

impl SoapEnvelope {
    pub fn new(body: SoapBody) -> Self {
        Self { header: None, body }
    }

    /// Élément `<u:{action}Response>` du corps, s'il existe.
    pub fn action_response(&self, action: &str) -> Option<&Element> {
        let name = format!("{action}Response");
        find_child_with_suffix(&self.body.content, &name)
    }
}

/// Premier enfant direct dont le nom (préfixe de namespace ignoré) se
/// termine par `suffix`.
pub fn find_child_with_suffix<'a>(parent: &'a Element, suffix: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(suffix) => Some(elem),
        _ => None,
    })
}

/// Texte trimé d'un enfant direct ; `None` si absent. Un élément vide donne
/// une chaîne vide.
pub fn child_text(parent: &Element, suffix: &str) -> Option<String> {
    let child = find_child_with_suffix(parent, suffix)?;
    Some(
        child
            .get_text()
            .map(|t| t.trim().to_string())
            .unwrap_or_default(),
    )
}
