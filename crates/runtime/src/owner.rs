use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Resource;
use riff_core::{ObjectKey, Reference};

/// Controller owner reference pointing at `parent`.
pub fn controller_ref<P: Resource<DynamicType = ()>>(parent: &P) -> OwnerReference {
    let meta = parent.meta();
    OwnerReference {
        api_version: P::api_version(&()).to_string(),
        kind: P::kind(&()).to_string(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Make `parent` the controller of `child`, replacing any other controller.
pub fn set_controller<P: Resource<DynamicType = ()>>(child: &mut ObjectMeta, parent: &P) {
    let owner = controller_ref(parent);
    let refs = child.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.controller != Some(true));
    refs.push(owner);
}

/// The controller owner reference of `child`, if any.
pub fn controller_of(child: &ObjectMeta) -> Option<&OwnerReference> {
    child.owner_references.as_ref()?.iter().find(|r| r.controller == Some(true))
}

pub fn is_controlled_by<P: Resource<DynamicType = ()>>(child: &ObjectMeta, parent: &P) -> bool {
    let Some(owner) = controller_of(child) else { return false };
    let meta = parent.meta();
    owner.kind == P::kind(&())
        && group_of(&owner.api_version) == P::group(&())
        && Some(&owner.name) == meta.name.as_ref()
        && owner.uid == meta.uid.clone().unwrap_or_default()
}

fn group_of(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// Tracker reference for an object of kind `K`.
pub fn reference_of<K: Resource<DynamicType = ()>>(obj: &K) -> Reference {
    let meta = obj.meta();
    let key = ObjectKey::new(meta.namespace.clone().unwrap_or_default(), meta.name.clone().unwrap_or_default());
    reference_to::<K>(&key)
}

pub fn reference_to<K: Resource<DynamicType = ()>>(key: &ObjectKey) -> Reference {
    Reference::new(K::group(&()), K::kind(&()), key)
}
