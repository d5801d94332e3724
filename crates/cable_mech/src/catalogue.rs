use crate::builtins::{Exp2Syn, ExpSyn, GapJunction, Hh, IonDecay, Nernst, Pas};
use crate::{Mechanism, MechanismError, MechanismInfo};
use std::collections::BTreeMap;

type Builder = fn() -> Result<Box<dyn Mechanism>, MechanismError>;

/// Mechanism catalogue: name → descriptor plus instance builder. Read-only
/// once the simulation is constructed.
pub struct Catalogue {
    entries: BTreeMap<String, (MechanismInfo, Builder)>,
}

impl std::fmt::Debug for Catalogue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalogue")
            .field("mechanisms", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Catalogue {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, info: MechanismInfo, builder: Builder) {
        self.entries.insert(info.name.to_string(), (info, builder));
    }

    pub fn info(&self, name: &str) -> Result<&MechanismInfo, MechanismError> {
        self.entries
            .get(name)
            .map(|(info, _)| info)
            .ok_or_else(|| MechanismError::UnknownMechanism(name.to_string()))
    }

    pub fn instance(&self, name: &str) -> Result<Box<dyn Mechanism>, MechanismError> {
        let (_, builder) = self
            .entries
            .get(name)
            .ok_or_else(|| MechanismError::UnknownMechanism(name.to_string()))?;
        builder()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for Catalogue {
    fn default() -> Self {
        default_catalogue()
    }
}

fn builtin_catalogue() -> Result<Catalogue, MechanismError> {
    let mut cat = Catalogue::new();
    cat.register(Pas::new().info().clone(), || Ok(Box::new(Pas::new())));
    cat.register(Hh::new().info().clone(), || Ok(Box::new(Hh::new())));
    cat.register(ExpSyn::new().info().clone(), || Ok(Box::new(ExpSyn::new())));
    cat.register(Exp2Syn::new().info().clone(), || {
        Ok(Box::new(Exp2Syn::new()))
    });
    cat.register(GapJunction::new().info().clone(), || {
        Ok(Box::new(GapJunction::new()))
    });
    cat.register(IonDecay::new().info().clone(), || {
        Ok(Box::new(IonDecay::new()))
    });
    cat.register(Nernst::new("na")?.info().clone(), || {
        Ok(Box::new(Nernst::new("na")?))
    });
    cat.register(Nernst::new("k")?.info().clone(), || {
        Ok(Box::new(Nernst::new("k")?))
    });
    cat.register(Nernst::new("ca")?.info().clone(), || {
        Ok(Box::new(Nernst::new("ca")?))
    });
    Ok(cat)
}

/// The built-in catalogue. The builtin set is closed over known ions, so
/// registration cannot fail.
pub fn default_catalogue() -> Catalogue {
    builtin_catalogue().expect("builtin mechanisms are well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MechanismKind;

    #[test]
    fn default_catalogue_contents() {
        let cat = default_catalogue();
        assert_eq!(cat.info("pas").unwrap().kind, MechanismKind::Density);
        assert_eq!(cat.info("expsyn").unwrap().kind, MechanismKind::Point);
        assert!(cat.info("expsyn").unwrap().linear);
        assert_eq!(cat.info("gj").unwrap().kind, MechanismKind::GapJunction);
        assert_eq!(
            cat.info("nernst/ca").unwrap().kind,
            MechanismKind::ReversalPotential
        );
        assert!(cat.info("nonesuch").is_err());
        assert!(cat.instance("nernst/k").is_ok());
    }

    #[test]
    fn nernst_rejects_unknown_ions() {
        let err = Nernst::new("zn");
        assert!(matches!(err, Err(MechanismError::UnknownMechanism(name)) if name == "nernst/zn"));
    }
}
