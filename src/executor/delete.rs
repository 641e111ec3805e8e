//! Record deletion.
//!
//! Events come out child before parent: the links pointing at a record and
//! the records relying on it are reported before the record itself, so a
//! consumer applying events in order never sees a dangling reference.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::db::schema::{LinkSide, RecordId};
use crate::error::Result;
use crate::executor::query::snapshot_query;
use crate::executor::{related_id, Executor, Mutation, MutationEvent};
use crate::queries::MatchExp;
use crate::value::{Record, ID_ATTR};

#[derive(Default)]
struct Cascade {
    deleted: HashSet<(RecordId, i64)>,
    events: Vec<MutationEvent>,
}

impl Executor<'_> {
    pub fn delete(&self, record: RecordId, exp: &MatchExp) -> Result<Mutation> {
        let info = self.schema.record(record);
        let root = info.root;
        let matched = self.find(record, Some(exp), &snapshot_query(self.schema.record(root)), None)?;

        let mut cascade = Cascade::default();
        for found in &matched {
            if let Some(id) = found.id() {
                self.delete_one(root, id, &mut cascade)?;
            }
        }
        debug!(
            record = %info.name,
            deleted = matched.len(),
            events = cascade.events.len(),
            "deleted records"
        );
        Ok(Mutation {
            records: matched,
            events: cascade.events,
        })
    }

    /// Delete the links of `link` matching `exp`, with their view events.
    ///
    /// Only for links stored in a table of their own.
    pub(crate) fn delete_links_matching(
        &self,
        link: RecordId,
        exp: &MatchExp,
        events: &mut Vec<MutationEvent>,
    ) -> Result<Vec<Record>> {
        let info = self.schema.record(link);
        let old = self.find(link, Some(exp), &snapshot_query(info), None)?;
        let ids: Vec<i64> = old.iter().filter_map(Record::id).collect();
        if ids.is_empty() {
            return Ok(old);
        }
        let before = self.view_membership(link, &ids)?;
        self.delete_rows(&info.table, info.id_column(), &ids)?;
        for record in &old {
            events.push(MutationEvent::delete(info.name.clone(), record.clone()));
        }
        let snapshots = old
            .iter()
            .filter_map(|r| r.id().map(|id| (id, (Some(r.clone()), None))))
            .collect();
        self.view_events(link, &before, &HashMap::new(), &snapshots, events);
        Ok(old)
    }

    fn delete_one(&self, root: RecordId, id: i64, cascade: &mut Cascade) -> Result<()> {
        if !cascade.deleted.insert((root, id)) {
            return Ok(());
        }
        let info = self.schema.record(root);
        let Some(old) = self.load_record(root, id)? else {
            return Ok(());
        };

        if let Some(link) = &info.link {
            if link.combined {
                if let Some(target) = related_id(&old, LinkSide::Target.name()) {
                    self.extract_member(link.target, target, root, true, &mut cascade.events)?;
                }
                return Ok(());
            }
        }

        let before = self.view_membership(root, &[id])?;
        if info.is_relation() {
            self.delete_rows(&info.table, info.id_column(), &[id])?;
            self.push_deleted(root, old, &before, cascade);
            return Ok(());
        }
        let table = self.schema.table_of(root);
        if table.is_shared() {
            self.delete_row_mates(root, id, cascade)?;
        }
        self.detach(root, id, cascade)?;
        self.delete_rows(&info.table, info.id_column(), &[id])?;
        self.push_deleted(root, old, &before, cascade);
        Ok(())
    }

    fn push_deleted(
        &self,
        root: RecordId,
        old: Record,
        before: &HashMap<RecordId, BTreeSet<i64>>,
        cascade: &mut Cascade,
    ) {
        let Some(id) = old.id() else {
            return;
        };
        let name = self.schema.record(root).name.clone();
        cascade.events.push(MutationEvent::delete(name, old.clone()));
        let snapshots = HashMap::from([(id, (Some(old), None))]);
        self.view_events(root, before, &HashMap::new(), &snapshots, &mut cascade.events);
    }

    /// Report the combined links and sibling records sharing the row of
    /// `root` `id`; the row itself goes with the record.
    fn delete_row_mates(&self, root: RecordId, id: i64, cascade: &mut Cascade) -> Result<()> {
        let info = self.schema.record(root);
        let table = self.schema.table_of(root);
        let mates: Vec<RecordId> = table.members.iter().copied().filter(|&m| m != root).collect();
        let columns: Vec<String> = mates
            .iter()
            .map(|&m| self.schema.record(m).id_column().to_string())
            .collect();
        let Some(row) = self.read_row(&table.name, info.id_column(), id, &columns)? else {
            return Ok(());
        };
        let present: Vec<(RecordId, i64)> = mates
            .into_iter()
            .zip(row)
            .filter_map(|(m, v)| v.as_i64().map(|mate_id| (m, mate_id)))
            .collect();

        for &(link, link_id) in present.iter().filter(|(m, _)| self.schema.record(*m).is_relation()) {
            if !cascade.deleted.insert((link, link_id)) {
                continue;
            }
            if let Some(old) = self.load_record(link, link_id)? {
                let name = self.schema.record(link).name.clone();
                cascade.events.push(MutationEvent::delete(name, old));
            }
        }
        for &(sibling, sibling_id) in present.iter().filter(|(m, _)| !self.schema.record(*m).is_relation()) {
            if !cascade.deleted.insert((sibling, sibling_id)) {
                continue;
            }
            let Some(old) = self.load_record(sibling, sibling_id)? else {
                continue;
            };
            let before = self.view_membership(sibling, &[sibling_id])?;
            self.detach(sibling, sibling_id, cascade)?;
            self.push_deleted(sibling, old, &before, cascade);
        }
        Ok(())
    }

    /// Delete every link-table row pointing at `root` `id`, then the records
    /// relying on it.
    fn detach(&self, root: RecordId, id: i64, cascade: &mut Cascade) -> Result<()> {
        let mut reliant = Vec::new();
        for &(link, side) in &self.schema.record(root).incident_links {
            let link_record = self.schema.record(link);
            let Some(link_info) = &link_record.link else {
                continue;
            };
            if link_info.combined {
                continue;
            }
            let exp = MatchExp::eq(&format!("{}.{ID_ATTR}", side.name()), id);
            let links = self.find(link, Some(&exp), &snapshot_query(link_record), None)?;
            for found in links {
                let Some(link_id) = found.id() else {
                    continue;
                };
                if link_info.reliance && side == LinkSide::Source {
                    if let Some(target) = related_id(&found, LinkSide::Target.name()) {
                        reliant.push((self.schema.record(link_info.target).root, target));
                    }
                }
                if !cascade.deleted.insert((link, link_id)) {
                    continue;
                }
                let before = self.view_membership(link, &[link_id])?;
                self.delete_rows(&link_record.table, link_record.id_column(), &[link_id])?;
                self.push_deleted(link, found, &before, cascade);
            }
        }
        for (target, target_id) in reliant {
            self.delete_one(target, target_id, cascade)?;
        }
        Ok(())
    }
}
