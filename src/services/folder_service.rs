//! FolderService — the typed, cycle-free folder forest per project.
//!
//! Folder rows live in SQLite; the derived aggregate counts and the cycle
//! check are pure functions over in-memory snapshots of the tree so they can
//! be reasoned about (and tested) without a database in hand. Mutations run
//! inside a transaction so the snapshot the cycle check saw is the state the
//! write lands on.

use crate::errors::AppError;
use crate::models::folder::{Folder, FolderType};
use crate::services::policy::{self, FolderOperation};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A folder plus its derived badge counts (own files plus all descendants).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FolderNode {
    #[serde(flatten)]
    pub folder: Folder,
    pub asset_count: i64,
    pub delivery_count: i64,
}

#[derive(Clone)]
pub struct FolderService {
    db: Arc<SqlitePool>,
}

impl FolderService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create a user folder. Only PROJECT-type folders may be created;
    /// ASSETS/DELIVERABLES are provisioned once per project by the system.
    pub async fn create(
        &self,
        project_id: Uuid,
        name: &str,
        folder_type: FolderType,
        parent_id: Option<Uuid>,
    ) -> Result<Folder, AppError> {
        if !policy::folder_type_allowed(FolderOperation::CreateUserFolder, folder_type) {
            return Err(AppError::Validation(format!(
                "folders of type {:?} are system-provisioned and cannot be created",
                folder_type
            )));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("folder name cannot be empty".into()));
        }

        if let Some(parent) = parent_id {
            // Parent must exist inside the same project.
            self.fetch_folder_in_project(parent, project_id).await?;
        }

        let folder = Folder {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            folder_type,
            parent_id,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO folders (id, project_id, name, folder_type, parent_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(folder.id)
        .bind(folder.project_id)
        .bind(&folder.name)
        .bind(folder.folder_type)
        .bind(folder.parent_id)
        .bind(folder.created_at)
        .execute(&*self.db)
        .await?;

        info!(folder_id = %folder.id, project_id = %project_id, "created folder");
        Ok(folder)
    }

    /// Look up a folder by id, without project scoping. Used by handlers to
    /// resolve the owning project before running the authorization guard.
    pub async fn fetch_folder(&self, folder_id: Uuid) -> Result<Folder, AppError> {
        sqlx::query_as::<_, Folder>(
            "SELECT id, project_id, name, folder_type, parent_id, created_at
             FROM folders WHERE id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("folder `{}` not found", folder_id)))
    }

    /// Look up a folder and require it to belong to the given project.
    pub async fn fetch_folder_in_project(
        &self,
        folder_id: Uuid,
        project_id: Uuid,
    ) -> Result<Folder, AppError> {
        let folder = self.fetch_folder(folder_id).await?;
        if folder.project_id != project_id {
            return Err(AppError::not_found(format!(
                "folder `{}` not found in project `{}`",
                folder_id, project_id
            )));
        }
        Ok(folder)
    }

    /// Rename and/or reparent a folder. `new_parent` distinguishes "leave
    /// alone" (`None`) from "move to project root" (`Some(None)`).
    ///
    /// Reparenting rejects self-parenting and any move under a descendant.
    /// The snapshot, the cycle check, and the write share one transaction.
    pub async fn update(
        &self,
        folder_id: Uuid,
        new_name: Option<&str>,
        new_parent: Option<Option<Uuid>>,
    ) -> Result<Folder, AppError> {
        let mut tx = self.db.begin().await?;

        let folder = sqlx::query_as::<_, Folder>(
            "SELECT id, project_id, name, folder_type, parent_id, created_at
             FROM folders WHERE id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("folder `{}` not found", folder_id)))?;

        let name = match new_name {
            Some(name) => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(AppError::Validation("folder name cannot be empty".into()));
                }
                name.to_string()
            }
            None => folder.name.clone(),
        };

        let parent_id = match new_parent {
            None => folder.parent_id,
            Some(candidate) => {
                if folder.folder_type.is_system() {
                    return Err(AppError::Validation(
                        "system folders cannot be moved".into(),
                    ));
                }
                if let Some(parent) = candidate {
                    if parent == folder.id {
                        return Err(AppError::Conflict(
                            "cannot move a folder into itself".into(),
                        ));
                    }
                    let parents: Vec<(Uuid, Option<Uuid>)> = sqlx::query_as(
                        "SELECT id, parent_id FROM folders WHERE project_id = ?",
                    )
                    .bind(folder.project_id)
                    .fetch_all(&mut *tx)
                    .await?;
                    let snapshot: HashMap<Uuid, Option<Uuid>> = parents.into_iter().collect();

                    if !snapshot.contains_key(&parent) {
                        return Err(AppError::not_found(format!(
                            "folder `{}` not found in project `{}`",
                            parent, folder.project_id
                        )));
                    }
                    if would_create_cycle(&snapshot, folder.id, parent) {
                        return Err(AppError::Conflict(
                            "cannot move a folder into one of its descendants".into(),
                        ));
                    }
                }
                candidate
            }
        };

        sqlx::query("UPDATE folders SET name = ?, parent_id = ? WHERE id = ?")
            .bind(&name)
            .bind(parent_id)
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(folder_id = %folder.id, "updated folder");
        Ok(Folder {
            name,
            parent_id,
            ..folder
        })
    }

    /// Delete a folder. Direct children — sub-folders, assets, deliveries —
    /// are detached to the project root, never cascade-deleted.
    pub async fn delete(&self, folder_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.db.begin().await?;

        let folder = sqlx::query_as::<_, Folder>(
            "SELECT id, project_id, name, folder_type, parent_id, created_at
             FROM folders WHERE id = ?",
        )
        .bind(folder_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found(format!("folder `{}` not found", folder_id)))?;

        if folder.folder_type.is_system() {
            return Err(AppError::Validation(
                "system folders cannot be deleted".into(),
            ));
        }

        sqlx::query("UPDATE folders SET parent_id = NULL WHERE parent_id = ?")
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE assets SET folder_id = NULL WHERE folder_id = ?")
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE deliveries SET folder_id = NULL WHERE folder_id = ?")
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM folders WHERE id = ?")
            .bind(folder.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(folder_id = %folder.id, "deleted folder, children detached to root");
        Ok(())
    }

    /// List a project's folders with aggregate asset/delivery counts
    /// (own files plus everything beneath).
    pub async fn list_with_counts(&self, project_id: Uuid) -> Result<Vec<FolderNode>, AppError> {
        let folders = sqlx::query_as::<_, Folder>(
            "SELECT id, project_id, name, folder_type, parent_id, created_at
             FROM folders WHERE project_id = ? ORDER BY created_at ASC",
        )
        .bind(project_id)
        .fetch_all(&*self.db)
        .await?;

        let asset_counts = self.direct_counts(project_id, "assets").await?;
        let delivery_counts = self.direct_counts(project_id, "deliveries").await?;

        let mut direct = HashMap::new();
        for (id, n) in asset_counts {
            direct.entry(id).or_insert((0, 0)).0 = n;
        }
        for (id, n) in delivery_counts {
            direct.entry(id).or_insert((0, 0)).1 = n;
        }

        let edges: Vec<(Uuid, Option<Uuid>)> =
            folders.iter().map(|f| (f.id, f.parent_id)).collect();
        let aggregated = aggregate_counts(&edges, &direct);

        Ok(folders
            .into_iter()
            .map(|folder| {
                let (asset_count, delivery_count) =
                    aggregated.get(&folder.id).copied().unwrap_or((0, 0));
                FolderNode {
                    folder,
                    asset_count,
                    delivery_count,
                }
            })
            .collect())
    }

    /// Provision the per-project system folders. Idempotent; the migrate
    /// command runs this as a backfill for every existing project.
    pub async fn provision_system_folders(&self, project_id: Uuid) -> Result<(), AppError> {
        for (name, folder_type) in [
            ("Assets", FolderType::Assets),
            ("Deliverables", FolderType::Deliverables),
        ] {
            let exists: Option<Uuid> = sqlx::query_scalar(
                "SELECT id FROM folders WHERE project_id = ? AND folder_type = ?",
            )
            .bind(project_id)
            .bind(folder_type)
            .fetch_optional(&*self.db)
            .await?;
            if exists.is_some() {
                continue;
            }
            sqlx::query(
                "INSERT INTO folders (id, project_id, name, folder_type, parent_id, created_at)
                 VALUES (?, ?, ?, ?, NULL, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(project_id)
            .bind(name)
            .bind(folder_type)
            .bind(Utc::now())
            .execute(&*self.db)
            .await?;
        }
        Ok(())
    }

    async fn direct_counts(
        &self,
        project_id: Uuid,
        table: &str,
    ) -> Result<Vec<(Uuid, i64)>, AppError> {
        // `table` is one of two internal constants, never user input.
        let sql = format!(
            "SELECT folder_id, COUNT(*) FROM {table}
             WHERE project_id = ? AND folder_id IS NOT NULL GROUP BY folder_id"
        );
        Ok(sqlx::query_as(&sql)
            .bind(project_id)
            .fetch_all(&*self.db)
            .await?)
    }
}

/// Whether setting `folder`'s parent to `new_parent` would close a cycle,
/// judged against a snapshot of the project's parent-pointer map.
///
/// Walks `new_parent`'s ancestor chain to the root; the move is a cycle iff
/// `folder` appears on that chain. The walk is bounded by the snapshot size
/// so a corrupt map cannot loop forever.
pub fn would_create_cycle(
    parents: &HashMap<Uuid, Option<Uuid>>,
    folder: Uuid,
    new_parent: Uuid,
) -> bool {
    if new_parent == folder {
        return true;
    }
    let mut current = Some(new_parent);
    let mut steps = 0;
    while let Some(node) = current {
        if node == folder {
            return true;
        }
        steps += 1;
        if steps > parents.len() {
            // Pre-existing cycle in the snapshot; refuse the move.
            return true;
        }
        current = parents.get(&node).copied().flatten();
    }
    false
}

/// Bottom-up aggregate counts: `aggregate(f) = direct(f) + Σ aggregate(child)`.
///
/// `edges` is the (folder, parent) list; `direct` maps folder id to its own
/// (asset, delivery) counts. Memoized per traversal so shared subtrees are
/// computed once.
pub fn aggregate_counts(
    edges: &[(Uuid, Option<Uuid>)],
    direct: &HashMap<Uuid, (i64, i64)>,
) -> HashMap<Uuid, (i64, i64)> {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (id, parent) in edges {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*id);
        }
    }

    fn visit(
        node: Uuid,
        children: &HashMap<Uuid, Vec<Uuid>>,
        direct: &HashMap<Uuid, (i64, i64)>,
        memo: &mut HashMap<Uuid, (i64, i64)>,
    ) -> (i64, i64) {
        if let Some(&cached) = memo.get(&node) {
            return cached;
        }
        let (mut assets, mut deliveries) = direct.get(&node).copied().unwrap_or((0, 0));
        if let Some(kids) = children.get(&node) {
            for &kid in kids {
                let (a, d) = visit(kid, children, direct, memo);
                assets += a;
                deliveries += d;
            }
        }
        memo.insert(node, (assets, deliveries));
        (assets, deliveries)
    }

    let mut memo = HashMap::new();
    for (id, _) in edges {
        visit(*id, &children, direct, &mut memo);
    }
    memo
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn cycle_rejects_move_under_any_descendant() {
        // a -> b -> c -> d (chain, parent pointers upward)
        let v = ids(4);
        let parents: HashMap<Uuid, Option<Uuid>> = [
            (v[0], None),
            (v[1], Some(v[0])),
            (v[2], Some(v[1])),
            (v[3], Some(v[2])),
        ]
        .into_iter()
        .collect();

        // moving a under its grandchild (or deeper) closes a cycle
        assert!(would_create_cycle(&parents, v[0], v[1]));
        assert!(would_create_cycle(&parents, v[0], v[2]));
        assert!(would_create_cycle(&parents, v[0], v[3]));
        assert!(would_create_cycle(&parents, v[1], v[3]));
    }

    #[test]
    fn cycle_allows_move_to_non_descendant() {
        let v = ids(4);
        // two siblings under a root, plus a detached node
        let parents: HashMap<Uuid, Option<Uuid>> = [
            (v[0], None),
            (v[1], Some(v[0])),
            (v[2], Some(v[0])),
            (v[3], None),
        ]
        .into_iter()
        .collect();

        assert!(!would_create_cycle(&parents, v[1], v[2]));
        assert!(!would_create_cycle(&parents, v[1], v[3]));
        assert!(!would_create_cycle(&parents, v[3], v[2]));
    }

    #[test]
    fn cycle_rejects_self_parent() {
        let v = ids(1);
        let parents: HashMap<Uuid, Option<Uuid>> = [(v[0], None)].into_iter().collect();
        assert!(would_create_cycle(&parents, v[0], v[0]));
    }

    #[test]
    fn aggregates_sum_descendants_bottom_up() {
        // root -> a -> b, root -> c
        let &[root, a, b, c] = &ids(4)[..] else {
            unreachable!()
        };
        let edges = vec![
            (root, None),
            (a, Some(root)),
            (b, Some(a)),
            (c, Some(root)),
        ];
        let direct: HashMap<Uuid, (i64, i64)> = [
            (root, (1, 0)),
            (a, (2, 1)),
            (b, (4, 0)),
            (c, (0, 3)),
        ]
        .into_iter()
        .collect();

        let agg = aggregate_counts(&edges, &direct);
        assert_eq!(agg[&b], (4, 0));
        assert_eq!(agg[&a], (6, 1));
        assert_eq!(agg[&c], (0, 3));
        assert_eq!(agg[&root], (7, 4));
    }

    #[test]
    fn aggregates_handle_leaves_and_empty_folders() {
        let &[lone] = &ids(1)[..] else { unreachable!() };
        let agg = aggregate_counts(&[(lone, None)], &HashMap::new());
        assert_eq!(agg[&lone], (0, 0));
    }

    async fn test_service() -> (FolderService, Uuid) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }

        let user_id = Uuid::new_v4();
        let project_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (id, name, role, created_at) VALUES (?, 'pat', 'ADMIN', ?)")
            .bind(user_id)
            .bind(chrono::Utc::now())
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO projects (id, name, status, client_id, created_by, created_at)
             VALUES (?, 'p', 'IN_PROGRESS', ?, ?, ?)",
        )
        .bind(project_id)
        .bind(user_id)
        .bind(user_id)
        .bind(chrono::Utc::now())
        .execute(&pool)
        .await
        .unwrap();

        (FolderService::new(Arc::new(pool)), project_id)
    }

    #[tokio::test]
    async fn create_rejects_system_types() {
        let (svc, project) = test_service().await;
        for t in [FolderType::Assets, FolderType::Deliverables] {
            let err = svc.create(project, "x", t, None).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(svc.create(project, "docs", FolderType::Project, None).await.is_ok());
    }

    #[tokio::test]
    async fn reparent_into_grandchild_is_rejected() {
        let (svc, project) = test_service().await;
        let a = svc.create(project, "a", FolderType::Project, None).await.unwrap();
        let b = svc
            .create(project, "b", FolderType::Project, Some(a.id))
            .await
            .unwrap();
        let c = svc
            .create(project, "c", FolderType::Project, Some(b.id))
            .await
            .unwrap();

        let err = svc.update(a.id, None, Some(Some(c.id))).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // sanity: a sibling move still works
        let moved = svc.update(c.id, None, Some(Some(a.id))).await.unwrap();
        assert_eq!(moved.parent_id, Some(a.id));
    }

    #[tokio::test]
    async fn delete_detaches_children_instead_of_cascading() {
        let (svc, project) = test_service().await;
        svc.provision_system_folders(project).await.unwrap();
        let parent = svc.create(project, "parent", FolderType::Project, None).await.unwrap();
        let child = svc
            .create(project, "child", FolderType::Project, Some(parent.id))
            .await
            .unwrap();

        // a delivery attached directly to the doomed folder
        let user: Uuid = sqlx::query_scalar("SELECT id FROM users LIMIT 1")
            .fetch_one(&**svc_db(&svc))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO deliveries (id, project_id, key, filename, size_bytes, folder_id, uploaded_by, uploaded_at)
             VALUES (?, ?, 'k', 'f.zip', 10, ?, ?, ?)",
        )
        .bind(Uuid::new_v4())
        .bind(project)
        .bind(parent.id)
        .bind(user)
        .bind(chrono::Utc::now())
        .execute(&**svc_db(&svc))
        .await
        .unwrap();

        svc.delete(parent.id).await.unwrap();

        let child = svc.fetch_folder(child.id).await.unwrap();
        assert_eq!(child.parent_id, None);
        let orphaned: Option<Uuid> =
            sqlx::query_scalar("SELECT folder_id FROM deliveries LIMIT 1")
                .fetch_one(&**svc_db(&svc))
                .await
                .unwrap();
        assert_eq!(orphaned, None);
    }

    #[tokio::test]
    async fn listed_counts_include_descendants() {
        let (svc, project) = test_service().await;
        let top = svc.create(project, "top", FolderType::Project, None).await.unwrap();
        let nested = svc
            .create(project, "nested", FolderType::Project, Some(top.id))
            .await
            .unwrap();

        let user: Uuid = sqlx::query_scalar("SELECT id FROM users LIMIT 1")
            .fetch_one(&**svc_db(&svc))
            .await
            .unwrap();
        for folder in [top.id, nested.id] {
            sqlx::query(
                "INSERT INTO deliveries (id, project_id, key, filename, size_bytes, folder_id, uploaded_by, uploaded_at)
                 VALUES (?, ?, 'k', 'f.zip', 10, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(project)
            .bind(folder)
            .bind(user)
            .bind(chrono::Utc::now())
            .execute(&**svc_db(&svc))
            .await
            .unwrap();
        }

        let nodes = svc.list_with_counts(project).await.unwrap();
        let top_node = nodes.iter().find(|n| n.folder.id == top.id).unwrap();
        let nested_node = nodes.iter().find(|n| n.folder.id == nested.id).unwrap();
        assert_eq!(top_node.delivery_count, 2);
        assert_eq!(nested_node.delivery_count, 1);
    }

    #[tokio::test]
    async fn system_folders_cannot_be_moved_or_deleted() {
        let (svc, project) = test_service().await;
        svc.provision_system_folders(project).await.unwrap();
        let nodes = svc.list_with_counts(project).await.unwrap();
        let assets = nodes
            .iter()
            .find(|n| n.folder.folder_type == FolderType::Assets)
            .unwrap();

        let err = svc
            .update(assets.folder.id, None, Some(None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = svc.delete(assets.folder.id).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    fn svc_db(svc: &FolderService) -> &Arc<SqlitePool> {
        &svc.db
    }
}
