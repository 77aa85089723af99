use super::InterceptorPipeline;
use crate::types::{ClassId, MethodId};
use crate::util::ArcId;

/// Members of a type that a proxy should intercept
///
/// Members are kept sorted and de-duplicated (by identity), so two contracts listing the same
/// members in a different order are equal.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct ProxyContract {
    target: ClassId,
    members: Vec<MethodId>,
}

impl ProxyContract {
    pub fn new(target: &ClassId, members: impl IntoIterator<Item = MethodId>) -> ProxyContract {
        let mut members: Vec<MethodId> = members.into_iter().collect();
        members.sort();
        members.dedup();
        ProxyContract {
            target: target.clone(),
            members,
        }
    }

    /// Contract intercepting every member that can be intercepted
    ///
    /// For interfaces, these are all interface methods. For classes, these are the overridable
    /// methods visible on the class (the most derived version of each).
    pub fn all_members(target: &ClassId) -> ProxyContract {
        if target.is_interface() {
            return ProxyContract::new(target, target.interface_methods());
        }

        let mut members: Vec<MethodId> = vec![];
        let mut next = Some(target);
        while let Some(class) = next {
            for method in &class.methods {
                let hidden = members
                    .iter()
                    .any(|m| m.name == method.name && m.signature == method.signature);
                if method.is_overridable() && !method.is_generic() && !hidden {
                    members.push(method.clone());
                }
            }
            next = class.base.as_ref();
        }
        ProxyContract::new(target, members)
    }

    pub fn target(&self) -> &ClassId {
        &self.target
    }

    pub fn members(&self) -> &[MethodId] {
        &self.members
    }

    pub fn intercepts(&self, method: &MethodId) -> bool {
        self.members.binary_search(method).is_ok()
    }
}

/// Cache key for a proxy type: one type is built per contract and pipeline
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct PlanKey {
    pub contract: ProxyContract,
    pub pipeline: ArcId<InterceptorPipeline>,
}
