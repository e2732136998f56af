pub(crate) mod bert;
pub(crate) mod layers;
