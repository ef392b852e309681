pub mod changeset;
pub mod object;
