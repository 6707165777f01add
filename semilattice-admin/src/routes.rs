//! Paths of the per-node HTTP admin API.

use semilattice_types::{EntityKind, EntityUuid};

pub const SEMILATTICE: &str = "/ajax/semilattice";
pub const AJAX: &str = "/ajax";
pub const DIRECTORY: &str = "/ajax/directory";
pub const DIRECTORY_ALL: &str = "/ajax/directory/_";
pub const ISSUES: &str = "/ajax/issues";
pub const PROGRESS: &str = "/ajax/progress";

pub fn create(kind: EntityKind) -> String {
    format!("{SEMILATTICE}/{}/new", kind.collection())
}

pub fn entity(kind: EntityKind, id: EntityUuid) -> String {
    format!("{SEMILATTICE}/{}/{id}", kind.collection())
}

pub fn field(kind: EntityKind, id: EntityUuid, field: &str) -> String {
    format!("{SEMILATTICE}/{}/{id}/{field}", kind.collection())
}

pub fn resolve(kind: EntityKind, id: EntityUuid, field_name: &str) -> String {
    format!("{}/resolve", field(kind, id, field_name))
}

pub fn blueprint(table: EntityUuid) -> String {
    field(EntityKind::Table, table, "blueprint")
}

pub fn log(server: EntityUuid, max_length: usize) -> String {
    format!("/ajax/log/{server}?max_length={max_length}")
}

pub fn stat(query: &str) -> String {
    format!("/ajax/stat?{query}")
}

pub fn distribution(table: EntityUuid, depth: u32) -> String {
    format!("/ajax/distribution?namespace={table}&depth={depth}")
}
