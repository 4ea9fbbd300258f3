pub mod models;
pub mod schema;

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use diddit_shared::auth::Role;
use diddit_shared::domain::CompletionStatus;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::DatabaseErrorKind;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    Assignment, AssignmentView, Child, Completion, CompletionView, Household, Member, Membership,
    NewAssignment, NewChild, NewCompletion, NewHousehold, NewMembership, NewRedemption, NewReward,
    NewSession, NewTask, NewUser, PointsTotals, Redemption, Reward, Task, User,
};
use tracing::{debug, trace};
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
const MAX_PAGE_SIZE: usize = 1000;

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced row does not exist (or is outside the household).
    #[error("not found: {0}")]
    NotFound(String),

    /// The write would break a business rule (already completed, not enough points, ...).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _
            ))
        )
    }

    /// Foreign-key, check and not-null violations: the request referenced or
    /// supplied something the schema rejects.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StorageError::Database(diesel::result::Error::DatabaseError(
                DatabaseErrorKind::ForeignKeyViolation
                    | DatabaseErrorKind::CheckViolation
                    | DatabaseErrorKind::NotNullViolation,
                _
            ))
        )
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        let store = Store { pool };
        store
            .run(|conn| {
                let applied = conn
                    .run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                debug!(count = applied.len(), "migrations applied");
                Ok(())
            })
            .await?;
        Ok(store)
    }

    /// Runs `f` on a pooled connection off the async runtime.
    async fn run<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut conn)
        })
        .await?
    }

    // Users

    pub async fn create_user(
        &self,
        email: &str,
        display_name: &str,
        password_hash: &str,
    ) -> Result<User, StorageError> {
        use schema::users;
        let user = User {
            id: new_id(),
            email: email.to_string(),
            display_name: display_name.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now(),
        };
        self.run(move |conn| {
            diesel::insert_into(users::table)
                .values(&NewUser {
                    id: &user.id,
                    email: &user.email,
                    display_name: &user.display_name,
                    password_hash: &user.password_hash,
                    created_at: user.created_at,
                })
                .execute(conn)?;
            Ok(user)
        })
        .await
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl as u;
        let email = email.to_string();
        self.run(move |conn| {
            Ok(u::users
                .filter(u::email.eq(&email))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl as u;
        let user_id = user_id.to_string();
        self.run(move |conn| {
            Ok(u::users
                .filter(u::id.eq(&user_id))
                .select(User::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    // Sessions backing issued JWTs

    pub async fn create_session(&self, jti: &str, user_id: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let j = jti.to_string();
        let u = user_id.to_string();
        self.run(move |conn| {
            let ts = now();
            diesel::insert_into(sessions::table)
                .values(&NewSession {
                    jti: &j,
                    user_id: &u,
                    issued_at: ts,
                    last_used_at: ts,
                })
                .on_conflict_do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, jti: &str) -> Result<bool, StorageError> {
        use schema::sessions::dsl as s;
        let j = jti.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(s::sessions.filter(s::jti.eq(&j))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// The idle check and the `last_used_at` update are one UPDATE, so a
    /// concurrent request cannot revive a session that just went stale.
    pub async fn touch_session_with_cutoff(
        &self,
        jti: &str,
        cutoff: NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl as s;
        let j = jti.to_string();
        self.run(move |conn| {
            let updated = diesel::update(
                s::sessions
                    .filter(s::jti.eq(&j))
                    .filter(s::last_used_at.ge(cutoff)),
            )
            .set(s::last_used_at.eq(now()))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    /// Deletes sessions idle since before `cutoff`. Returns how many were removed.
    pub async fn purge_sessions_before(&self, cutoff: NaiveDateTime) -> Result<usize, StorageError> {
        use schema::sessions::dsl as s;
        self.run(move |conn| {
            Ok(diesel::delete(s::sessions.filter(s::last_used_at.lt(cutoff))).execute(conn)?)
        })
        .await
    }

    // Households and memberships

    /// Creates a household and makes `creator_id` its first admin.
    pub async fn create_household(
        &self,
        name: &str,
        creator_id: &str,
    ) -> Result<Household, StorageError> {
        use schema::{household_members, households};
        let household = Household {
            id: new_id(),
            name: name.to_string(),
            created_by: creator_id.to_string(),
            created_at: now(),
        };
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(), StorageError> {
                diesel::insert_into(households::table)
                    .values(&NewHousehold {
                        id: &household.id,
                        name: &household.name,
                        created_by: &household.created_by,
                        created_at: household.created_at,
                    })
                    .execute(conn)?;
                diesel::insert_into(household_members::table)
                    .values(&NewMembership {
                        household_id: &household.id,
                        user_id: &household.created_by,
                        role: Role::Admin.as_str(),
                        child_id: None,
                        joined_at: household.created_at,
                    })
                    .execute(conn)?;
                Ok(())
            })?;
            Ok(household)
        })
        .await
    }

    pub async fn list_households_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<(Household, Membership)>, StorageError> {
        use schema::{household_members as hm, households as h};
        let user_id = user_id.to_string();
        self.run(move |conn| {
            Ok(hm::table
                .inner_join(h::table)
                .filter(hm::user_id.eq(&user_id))
                .order(h::name.asc())
                .select((Household::as_select(), Membership::as_select()))
                .load::<(Household, Membership)>(conn)?)
        })
        .await
    }

    pub async fn get_household(&self, household_id: &str) -> Result<Option<Household>, StorageError> {
        use schema::households::dsl as h;
        let hid = household_id.to_string();
        self.run(move |conn| {
            Ok(h::households
                .filter(h::id.eq(&hid))
                .select(Household::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn rename_household(
        &self,
        household_id: &str,
        name: &str,
    ) -> Result<Option<Household>, StorageError> {
        use schema::households::dsl as h;
        let hid = household_id.to_string();
        let name = name.to_string();
        self.run(move |conn| {
            diesel::update(h::households.filter(h::id.eq(&hid)))
                .set(h::name.eq(&name))
                .execute(conn)?;
            Ok(h::households
                .filter(h::id.eq(&hid))
                .select(Household::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    /// Deletes the household; members, children, tasks and everything below cascade.
    pub async fn delete_household(&self, household_id: &str) -> Result<bool, StorageError> {
        use schema::households::dsl as h;
        let hid = household_id.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(h::households.filter(h::id.eq(&hid))).execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn get_membership(
        &self,
        household_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>, StorageError> {
        use schema::household_members::dsl as hm;
        let hid = household_id.to_string();
        let uid = user_id.to_string();
        self.run(move |conn| {
            Ok(hm::household_members
                .filter(hm::household_id.eq(&hid))
                .filter(hm::user_id.eq(&uid))
                .select(Membership::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list_members(&self, household_id: &str) -> Result<Vec<Member>, StorageError> {
        let hid = household_id.to_string();
        self.run(move |conn| load_members(conn, &hid, None)).await
    }

    pub async fn add_member(
        &self,
        household_id: &str,
        user_id: &str,
        role: Role,
        child_id: Option<&str>,
    ) -> Result<Member, StorageError> {
        use schema::household_members;
        let hid = household_id.to_string();
        let uid = user_id.to_string();
        let child = child_id.map(|s| s.to_string());
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Member, StorageError> {
                if find_membership(conn, &hid, &uid)?.is_some() {
                    return Err(StorageError::Conflict(format!(
                        "user {uid} is already a member"
                    )));
                }
                check_child_binding(conn, &hid, role, child.as_deref())?;
                diesel::insert_into(household_members::table)
                    .values(&NewMembership {
                        household_id: &hid,
                        user_id: &uid,
                        role: role.as_str(),
                        child_id: child.as_deref(),
                        joined_at: now(),
                    })
                    .execute(conn)?;
                load_members(conn, &hid, Some(&uid))?
                    .pop()
                    .ok_or_else(|| StorageError::NotFound(format!("member {uid}")))
            })
        })
        .await
    }

    /// Changes a member's role. Returns `None` when the user is not a member.
    pub async fn update_member(
        &self,
        household_id: &str,
        user_id: &str,
        role: Role,
        child_id: Option<&str>,
    ) -> Result<Option<Member>, StorageError> {
        use schema::household_members::dsl as hm;
        let hid = household_id.to_string();
        let uid = user_id.to_string();
        let child = child_id.map(|s| s.to_string());
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<Option<Member>, StorageError> {
                let Some(current) = find_membership(conn, &hid, &uid)? else {
                    return Ok(None);
                };
                if current.role == Role::Admin.as_str() && role != Role::Admin {
                    ensure_another_admin(conn, &hid)?;
                }
                check_child_binding(conn, &hid, role, child.as_deref())?;
                diesel::update(
                    hm::household_members
                        .filter(hm::household_id.eq(&hid))
                        .filter(hm::user_id.eq(&uid)),
                )
                .set((hm::role.eq(role.as_str()), hm::child_id.eq(child.as_deref())))
                .execute(conn)?;
                Ok(load_members(conn, &hid, Some(&uid))?.pop())
            })
        })
        .await
    }

    /// Removes a member. The last admin of a household cannot leave.
    pub async fn remove_member(&self, household_id: &str, user_id: &str) -> Result<bool, StorageError> {
        use schema::household_members::dsl as hm;
        let hid = household_id.to_string();
        let uid = user_id.to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<bool, StorageError> {
                let Some(current) = find_membership(conn, &hid, &uid)? else {
                    return Ok(false);
                };
                if current.role == Role::Admin.as_str() {
                    ensure_another_admin(conn, &hid)?;
                }
                let deleted = diesel::delete(
                    hm::household_members
                        .filter(hm::household_id.eq(&hid))
                        .filter(hm::user_id.eq(&uid)),
                )
                .execute(conn)?;
                Ok(deleted > 0)
            })
        })
        .await
    }

    // Children

    pub async fn create_child(
        &self,
        household_id: &str,
        name: &str,
        birth_date: Option<NaiveDate>,
        avatar: Option<&str>,
    ) -> Result<Child, StorageError> {
        use schema::children;
        let child = Child {
            id: new_id(),
            household_id: household_id.to_string(),
            name: name.to_string(),
            birth_date,
            avatar: avatar.map(|s| s.to_string()),
            created_at: now(),
        };
        self.run(move |conn| {
            diesel::insert_into(children::table)
                .values(&NewChild {
                    id: &child.id,
                    household_id: &child.household_id,
                    name: &child.name,
                    birth_date: child.birth_date,
                    avatar: child.avatar.as_deref(),
                    created_at: child.created_at,
                })
                .execute(conn)?;
            Ok(child)
        })
        .await
    }

    pub async fn list_children(&self, household_id: &str) -> Result<Vec<Child>, StorageError> {
        use schema::children::dsl as c;
        let hid = household_id.to_string();
        self.run(move |conn| {
            Ok(c::children
                .filter(c::household_id.eq(&hid))
                .order(c::name.asc())
                .select(Child::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_child(
        &self,
        household_id: &str,
        child_id: &str,
    ) -> Result<Option<Child>, StorageError> {
        let hid = household_id.to_string();
        let cid = child_id.to_string();
        self.run(move |conn| find_child(conn, &hid, &cid)).await
    }

    pub async fn update_child(
        &self,
        household_id: &str,
        child_id: &str,
        name: &str,
        birth_date: Option<NaiveDate>,
        avatar: Option<&str>,
    ) -> Result<Option<Child>, StorageError> {
        use schema::children::dsl as c;
        let hid = household_id.to_string();
        let cid = child_id.to_string();
        let name = name.to_string();
        let avatar = avatar.map(|s| s.to_string());
        self.run(move |conn| {
            diesel::update(
                c::children
                    .filter(c::household_id.eq(&hid))
                    .filter(c::id.eq(&cid)),
            )
            .set((
                c::name.eq(&name),
                c::birth_date.eq(birth_date),
                c::avatar.eq(avatar.as_deref()),
            ))
            .execute(conn)?;
            find_child(conn, &hid, &cid)
        })
        .await
    }

    pub async fn delete_child(&self, household_id: &str, child_id: &str) -> Result<bool, StorageError> {
        use schema::children::dsl as c;
        let hid = household_id.to_string();
        let cid = child_id.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(
                c::children
                    .filter(c::household_id.eq(&hid))
                    .filter(c::id.eq(&cid)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Tasks

    pub async fn create_task(
        &self,
        household_id: &str,
        title: &str,
        description: Option<&str>,
        points: i32,
        requires_approval: bool,
    ) -> Result<Task, StorageError> {
        use schema::tasks;
        let task = Task {
            id: new_id(),
            household_id: household_id.to_string(),
            title: title.to_string(),
            description: description.map(|s| s.to_string()),
            points,
            requires_approval,
            created_at: now(),
        };
        self.run(move |conn| {
            diesel::insert_into(tasks::table)
                .values(&NewTask {
                    id: &task.id,
                    household_id: &task.household_id,
                    title: &task.title,
                    description: task.description.as_deref(),
                    points: task.points,
                    requires_approval: task.requires_approval,
                    created_at: task.created_at,
                })
                .execute(conn)?;
            Ok(task)
        })
        .await
    }

    pub async fn list_tasks(&self, household_id: &str) -> Result<Vec<Task>, StorageError> {
        use schema::tasks::dsl as t;
        let hid = household_id.to_string();
        self.run(move |conn| {
            Ok(t::tasks
                .filter(t::household_id.eq(&hid))
                .order(t::title.asc())
                .select(Task::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_task(&self, household_id: &str, task_id: &str) -> Result<Option<Task>, StorageError> {
        let hid = household_id.to_string();
        let tid = task_id.to_string();
        self.run(move |conn| find_task(conn, &hid, &tid)).await
    }

    pub async fn update_task(
        &self,
        household_id: &str,
        task_id: &str,
        title: &str,
        description: Option<&str>,
        points: i32,
        requires_approval: bool,
    ) -> Result<Option<Task>, StorageError> {
        use schema::tasks::dsl as t;
        let hid = household_id.to_string();
        let tid = task_id.to_string();
        let title = title.to_string();
        let description = description.map(|s| s.to_string());
        self.run(move |conn| {
            diesel::update(t::tasks.filter(t::household_id.eq(&hid)).filter(t::id.eq(&tid)))
                .set((
                    t::title.eq(&title),
                    t::description.eq(description.as_deref()),
                    t::points.eq(points),
                    t::requires_approval.eq(requires_approval),
                ))
                .execute(conn)?;
            find_task(conn, &hid, &tid)
        })
        .await
    }

    pub async fn delete_task(&self, household_id: &str, task_id: &str) -> Result<bool, StorageError> {
        use schema::tasks::dsl as t;
        let hid = household_id.to_string();
        let tid = task_id.to_string();
        self.run(move |conn| {
            let deleted =
                diesel::delete(t::tasks.filter(t::household_id.eq(&hid)).filter(t::id.eq(&tid)))
                    .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Assignments

    /// Schedules `task_id` for `child_id` on `due_date`. Both must belong to the household.
    pub async fn create_assignment(
        &self,
        household_id: &str,
        task_id: &str,
        child_id: &str,
        due_date: NaiveDate,
    ) -> Result<AssignmentView, StorageError> {
        use schema::task_assignments;
        let hid = household_id.to_string();
        let tid = task_id.to_string();
        let cid = child_id.to_string();
        self.run(move |conn| {
            let task = find_task(conn, &hid, &tid)?
                .ok_or_else(|| StorageError::InvalidInput(format!("unknown task_id: {tid}")))?;
            find_child(conn, &hid, &cid)?
                .ok_or_else(|| StorageError::InvalidInput(format!("unknown child_id: {cid}")))?;
            let assignment = Assignment {
                id: new_id(),
                household_id: hid.clone(),
                task_id: tid.clone(),
                child_id: cid.clone(),
                due_date,
                created_at: now(),
            };
            diesel::insert_into(task_assignments::table)
                .values(&NewAssignment {
                    id: &assignment.id,
                    household_id: &assignment.household_id,
                    task_id: &assignment.task_id,
                    child_id: &assignment.child_id,
                    due_date: assignment.due_date,
                    created_at: assignment.created_at,
                })
                .execute(conn)?;
            Ok(AssignmentView {
                assignment,
                task,
                status: None,
            })
        })
        .await
    }

    pub async fn list_assignments(
        &self,
        household_id: &str,
        child_id: Option<&str>,
        due_date: Option<NaiveDate>,
    ) -> Result<Vec<AssignmentView>, StorageError> {
        use schema::{task_assignments as ta, tasks as t};
        let hid = household_id.to_string();
        let child = child_id.map(|s| s.to_string());
        self.run(move |conn| {
            let mut query = ta::table
                .inner_join(t::table)
                .filter(ta::household_id.eq(&hid))
                .select((Assignment::as_select(), Task::as_select()))
                .into_boxed();
            if let Some(cid) = &child {
                query = query.filter(ta::child_id.eq(cid.clone()));
            }
            if let Some(date) = due_date {
                query = query.filter(ta::due_date.eq(date));
            }
            let rows = query
                .order((ta::due_date.asc(), t::title.asc()))
                .load::<(Assignment, Task)>(conn)?;
            with_latest_status(conn, rows)
        })
        .await
    }

    pub async fn get_assignment(
        &self,
        household_id: &str,
        assignment_id: &str,
    ) -> Result<Option<AssignmentView>, StorageError> {
        let hid = household_id.to_string();
        let aid = assignment_id.to_string();
        self.run(move |conn| {
            let Some(row) = find_assignment(conn, &hid, &aid)? else {
                return Ok(None);
            };
            Ok(with_latest_status(conn, vec![row])?.pop())
        })
        .await
    }

    pub async fn delete_assignment(
        &self,
        household_id: &str,
        assignment_id: &str,
    ) -> Result<bool, StorageError> {
        use schema::task_assignments::dsl as ta;
        let hid = household_id.to_string();
        let aid = assignment_id.to_string();
        self.run(move |conn| {
            let deleted = diesel::delete(
                ta::task_assignments
                    .filter(ta::household_id.eq(&hid))
                    .filter(ta::id.eq(&aid)),
            )
            .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    // Completions

    /// Records that the assignment was done.
    ///
    /// When the task requires approval and a child submitted it, the completion
    /// stays `pending` with no points; otherwise it is approved immediately.
    /// An assignment with a pending or approved completion cannot be completed again.
    pub async fn complete_assignment(
        &self,
        household_id: &str,
        assignment_id: &str,
        completed_by: &str,
        submitted_by_child: bool,
        note: Option<&str>,
    ) -> Result<CompletionView, StorageError> {
        use schema::task_completions::{self, dsl as tc};
        let hid = household_id.to_string();
        let aid = assignment_id.to_string();
        let by = completed_by.to_string();
        let note = note.map(|s| s.to_string());
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<CompletionView, StorageError> {
                let (assignment, task) = find_assignment(conn, &hid, &aid)?
                    .ok_or_else(|| StorageError::NotFound(format!("assignment {aid}")))?;
                let statuses: Vec<String> = tc::task_completions
                    .filter(tc::assignment_id.eq(&aid))
                    .select(tc::status)
                    .load(conn)?;
                let already_open = statuses
                    .iter()
                    .filter_map(|s| s.parse::<CompletionStatus>().ok())
                    .any(|s| s.is_open());
                if already_open {
                    return Err(StorageError::Conflict(format!(
                        "assignment {aid} is already completed"
                    )));
                }
                let status = if task.requires_approval && submitted_by_child {
                    CompletionStatus::Pending
                } else {
                    CompletionStatus::Approved
                };
                let points = if status == CompletionStatus::Approved {
                    task.points
                } else {
                    0
                };
                let completion = Completion {
                    id: new_id(),
                    assignment_id: assignment.id.clone(),
                    child_id: assignment.child_id.clone(),
                    completed_by: by.clone(),
                    status: status.as_str().to_string(),
                    points_awarded: points,
                    note: note.clone(),
                    completed_at: now(),
                    reviewed_by: None,
                    reviewed_at: None,
                };
                diesel::insert_into(task_completions::table)
                    .values(&NewCompletion {
                        id: &completion.id,
                        assignment_id: &completion.assignment_id,
                        child_id: &completion.child_id,
                        completed_by: &completion.completed_by,
                        status: &completion.status,
                        points_awarded: completion.points_awarded,
                        note: completion.note.as_deref(),
                        completed_at: completion.completed_at,
                    })
                    .execute(conn)?;
                trace!(completion_id = %completion.id, status = %status, "completion recorded");
                Ok(CompletionView { completion, task })
            })
        })
        .await
    }

    pub async fn list_completions(
        &self,
        household_id: &str,
        status: Option<CompletionStatus>,
        child_id: Option<&str>,
    ) -> Result<Vec<CompletionView>, StorageError> {
        use schema::{task_assignments as ta, task_completions as tc, tasks as t};
        let hid = household_id.to_string();
        let child = child_id.map(|s| s.to_string());
        self.run(move |conn| {
            let mut query = tc::table
                .inner_join(ta::table.inner_join(t::table))
                .filter(ta::household_id.eq(&hid))
                .select((Completion::as_select(), Task::as_select()))
                .into_boxed();
            if let Some(status) = status {
                query = query.filter(tc::status.eq(status.as_str()));
            }
            if let Some(cid) = &child {
                query = query.filter(tc::child_id.eq(cid.clone()));
            }
            let rows = query
                .order(tc::completed_at.desc())
                .load::<(Completion, Task)>(conn)?;
            Ok(rows
                .into_iter()
                .map(|(completion, task)| CompletionView { completion, task })
                .collect())
        })
        .await
    }

    pub async fn get_completion(
        &self,
        household_id: &str,
        completion_id: &str,
    ) -> Result<Option<CompletionView>, StorageError> {
        let hid = household_id.to_string();
        let id = completion_id.to_string();
        self.run(move |conn| find_completion(conn, &hid, &id)).await
    }

    /// Approves or rejects a pending completion. Approval awards the task's points.
    pub async fn review_completion(
        &self,
        household_id: &str,
        completion_id: &str,
        reviewer: &str,
        approve: bool,
    ) -> Result<CompletionView, StorageError> {
        use schema::task_completions::dsl as tc;
        let hid = household_id.to_string();
        let id = completion_id.to_string();
        let reviewer = reviewer.to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<CompletionView, StorageError> {
                let view = find_completion(conn, &hid, &id)?
                    .ok_or_else(|| StorageError::NotFound(format!("completion {id}")))?;
                if view.completion.status != CompletionStatus::Pending.as_str() {
                    return Err(StorageError::Conflict(format!(
                        "completion {id} is {}, not pending",
                        view.completion.status
                    )));
                }
                let (status, points) = if approve {
                    (CompletionStatus::Approved, view.task.points)
                } else {
                    (CompletionStatus::Rejected, 0)
                };
                diesel::update(tc::task_completions.filter(tc::id.eq(&id)))
                    .set((
                        tc::status.eq(status.as_str()),
                        tc::points_awarded.eq(points),
                        tc::reviewed_by.eq(Some(reviewer.as_str())),
                        tc::reviewed_at.eq(Some(now())),
                    ))
                    .execute(conn)?;
                find_completion(conn, &hid, &id)?
                    .ok_or_else(|| StorageError::NotFound(format!("completion {id}")))
            })
        })
        .await
    }

    // Rewards

    pub async fn create_reward(
        &self,
        household_id: &str,
        title: &str,
        description: Option<&str>,
        cost: i32,
    ) -> Result<Reward, StorageError> {
        use schema::rewards;
        let reward = Reward {
            id: new_id(),
            household_id: household_id.to_string(),
            title: title.to_string(),
            description: description.map(|s| s.to_string()),
            cost,
            created_at: now(),
        };
        self.run(move |conn| {
            diesel::insert_into(rewards::table)
                .values(&NewReward {
                    id: &reward.id,
                    household_id: &reward.household_id,
                    title: &reward.title,
                    description: reward.description.as_deref(),
                    cost: reward.cost,
                    created_at: reward.created_at,
                })
                .execute(conn)?;
            Ok(reward)
        })
        .await
    }

    pub async fn list_rewards(&self, household_id: &str) -> Result<Vec<Reward>, StorageError> {
        use schema::rewards::dsl as r;
        let hid = household_id.to_string();
        self.run(move |conn| {
            Ok(r::rewards
                .filter(r::household_id.eq(&hid))
                .order((r::cost.asc(), r::title.asc()))
                .select(Reward::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn get_reward(
        &self,
        household_id: &str,
        reward_id: &str,
    ) -> Result<Option<Reward>, StorageError> {
        let hid = household_id.to_string();
        let rid = reward_id.to_string();
        self.run(move |conn| find_reward(conn, &hid, &rid)).await
    }

    pub async fn update_reward(
        &self,
        household_id: &str,
        reward_id: &str,
        title: &str,
        description: Option<&str>,
        cost: i32,
    ) -> Result<Option<Reward>, StorageError> {
        use schema::rewards::dsl as r;
        let hid = household_id.to_string();
        let rid = reward_id.to_string();
        let title = title.to_string();
        let description = description.map(|s| s.to_string());
        self.run(move |conn| {
            diesel::update(r::rewards.filter(r::household_id.eq(&hid)).filter(r::id.eq(&rid)))
                .set((
                    r::title.eq(&title),
                    r::description.eq(description.as_deref()),
                    r::cost.eq(cost),
                ))
                .execute(conn)?;
            find_reward(conn, &hid, &rid)
        })
        .await
    }

    /// Deletes a reward from the catalogue. Past redemptions keep their title and cost.
    pub async fn delete_reward(&self, household_id: &str, reward_id: &str) -> Result<bool, StorageError> {
        use schema::rewards::dsl as r;
        let hid = household_id.to_string();
        let rid = reward_id.to_string();
        self.run(move |conn| {
            let deleted =
                diesel::delete(r::rewards.filter(r::household_id.eq(&hid)).filter(r::id.eq(&rid)))
                    .execute(conn)?;
            Ok(deleted > 0)
        })
        .await
    }

    /// Spends the reward's cost from the child's balance.
    /// Fails with [`StorageError::Conflict`] when the balance is too low.
    pub async fn redeem_reward(
        &self,
        household_id: &str,
        reward_id: &str,
        child_id: &str,
        redeemed_by: &str,
    ) -> Result<(Redemption, PointsTotals), StorageError> {
        use schema::reward_redemptions;
        let hid = household_id.to_string();
        let rid = reward_id.to_string();
        let cid = child_id.to_string();
        let by = redeemed_by.to_string();
        self.run(move |conn| {
            conn.immediate_transaction(|conn| -> Result<(Redemption, PointsTotals), StorageError> {
                let reward = find_reward(conn, &hid, &rid)?
                    .ok_or_else(|| StorageError::NotFound(format!("reward {rid}")))?;
                find_child(conn, &hid, &cid)?
                    .ok_or_else(|| StorageError::InvalidInput(format!("unknown child_id: {cid}")))?;
                let totals = points_totals(conn, &cid)?;
                if totals.balance() < i64::from(reward.cost) {
                    return Err(StorageError::Conflict(format!(
                        "insufficient points: balance {} < cost {}",
                        totals.balance(),
                        reward.cost
                    )));
                }
                let redemption = Redemption {
                    id: new_id(),
                    reward_id: Some(reward.id.clone()),
                    reward_title: reward.title.clone(),
                    child_id: cid.clone(),
                    cost: reward.cost,
                    redeemed_by: by.clone(),
                    redeemed_at: now(),
                };
                diesel::insert_into(reward_redemptions::table)
                    .values(&NewRedemption {
                        id: &redemption.id,
                        reward_id: redemption.reward_id.as_deref(),
                        reward_title: &redemption.reward_title,
                        child_id: &redemption.child_id,
                        cost: redemption.cost,
                        redeemed_by: &redemption.redeemed_by,
                        redeemed_at: redemption.redeemed_at,
                    })
                    .execute(conn)?;
                let after = PointsTotals {
                    earned: totals.earned,
                    spent: totals.spent + i64::from(redemption.cost),
                };
                Ok((redemption, after))
            })
        })
        .await
    }

    pub async fn list_redemptions_for_child(
        &self,
        child_id: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Redemption>, StorageError> {
        use schema::reward_redemptions::dsl as rr;
        let cid = child_id.to_string();
        let per_page = per_page.clamp(1, MAX_PAGE_SIZE) as i64;
        // Pages far past the end just come back empty
        let page = i64::try_from(page.max(1)).unwrap_or(i64::MAX);
        let offset = (page - 1).saturating_mul(per_page);
        self.run(move |conn| {
            Ok(rr::reward_redemptions
                .filter(rr::child_id.eq(&cid))
                .order(rr::redeemed_at.desc())
                .offset(offset)
                .limit(per_page)
                .select(Redemption::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn compute_points(&self, child_id: &str) -> Result<PointsTotals, StorageError> {
        let cid = child_id.to_string();
        self.run(move |conn| points_totals(conn, &cid)).await
    }
}

fn find_membership(
    conn: &mut SqliteConnection,
    household_id: &str,
    user_id: &str,
) -> Result<Option<Membership>, StorageError> {
    use schema::household_members::dsl as hm;
    Ok(hm::household_members
        .filter(hm::household_id.eq(household_id))
        .filter(hm::user_id.eq(user_id))
        .select(Membership::as_select())
        .first(conn)
        .optional()?)
}

fn load_members(
    conn: &mut SqliteConnection,
    household_id: &str,
    only_user: Option<&str>,
) -> Result<Vec<Member>, StorageError> {
    use schema::{household_members as hm, users as u};
    let mut query = hm::table
        .inner_join(u::table)
        .filter(hm::household_id.eq(household_id))
        .select((Membership::as_select(), User::as_select()))
        .into_boxed();
    if let Some(uid) = only_user {
        query = query.filter(hm::user_id.eq(uid));
    }
    let rows = query
        .order((hm::joined_at.asc(), u::display_name.asc()))
        .load::<(Membership, User)>(conn)?;
    Ok(rows
        .into_iter()
        .map(|(membership, user)| Member { membership, user })
        .collect())
}

fn ensure_another_admin(conn: &mut SqliteConnection, household_id: &str) -> Result<(), StorageError> {
    use schema::household_members::dsl as hm;
    let admins: i64 = hm::household_members
        .filter(hm::household_id.eq(household_id))
        .filter(hm::role.eq(Role::Admin.as_str()))
        .count()
        .get_result(conn)?;
    if admins <= 1 {
        return Err(StorageError::Conflict(
            "household must keep at least one admin".into(),
        ));
    }
    Ok(())
}

/// Child memberships must point at a child of the same household; others must not.
fn check_child_binding(
    conn: &mut SqliteConnection,
    household_id: &str,
    role: Role,
    child_id: Option<&str>,
) -> Result<(), StorageError> {
    match (role, child_id) {
        (Role::Child, Some(cid)) => {
            if find_child(conn, household_id, cid)?.is_none() {
                return Err(StorageError::InvalidInput(format!("unknown child_id: {cid}")));
            }
            Ok(())
        }
        (Role::Child, None) => Err(StorageError::InvalidInput(
            "child_id is required for the child role".into(),
        )),
        (_, Some(_)) => Err(StorageError::InvalidInput(
            "child_id is only allowed for the child role".into(),
        )),
        (_, None) => Ok(()),
    }
}

fn find_child(
    conn: &mut SqliteConnection,
    household_id: &str,
    child_id: &str,
) -> Result<Option<Child>, StorageError> {
    use schema::children::dsl as c;
    Ok(c::children
        .filter(c::household_id.eq(household_id))
        .filter(c::id.eq(child_id))
        .select(Child::as_select())
        .first(conn)
        .optional()?)
}

fn find_task(
    conn: &mut SqliteConnection,
    household_id: &str,
    task_id: &str,
) -> Result<Option<Task>, StorageError> {
    use schema::tasks::dsl as t;
    Ok(t::tasks
        .filter(t::household_id.eq(household_id))
        .filter(t::id.eq(task_id))
        .select(Task::as_select())
        .first(conn)
        .optional()?)
}

fn find_reward(
    conn: &mut SqliteConnection,
    household_id: &str,
    reward_id: &str,
) -> Result<Option<Reward>, StorageError> {
    use schema::rewards::dsl as r;
    Ok(r::rewards
        .filter(r::household_id.eq(household_id))
        .filter(r::id.eq(reward_id))
        .select(Reward::as_select())
        .first(conn)
        .optional()?)
}

fn find_assignment(
    conn: &mut SqliteConnection,
    household_id: &str,
    assignment_id: &str,
) -> Result<Option<(Assignment, Task)>, StorageError> {
    use schema::{task_assignments as ta, tasks as t};
    Ok(ta::table
        .inner_join(t::table)
        .filter(ta::household_id.eq(household_id))
        .filter(ta::id.eq(assignment_id))
        .select((Assignment::as_select(), Task::as_select()))
        .first::<(Assignment, Task)>(conn)
        .optional()?)
}

fn find_completion(
    conn: &mut SqliteConnection,
    household_id: &str,
    completion_id: &str,
) -> Result<Option<CompletionView>, StorageError> {
    use schema::{task_assignments as ta, task_completions as tc, tasks as t};
    Ok(tc::table
        .inner_join(ta::table.inner_join(t::table))
        .filter(ta::household_id.eq(household_id))
        .filter(tc::id.eq(completion_id))
        .select((Completion::as_select(), Task::as_select()))
        .first::<(Completion, Task)>(conn)
        .optional()?
        .map(|(completion, task)| CompletionView { completion, task }))
}

/// Attaches the status of each assignment's most recent completion.
fn with_latest_status(
    conn: &mut SqliteConnection,
    rows: Vec<(Assignment, Task)>,
) -> Result<Vec<AssignmentView>, StorageError> {
    use schema::task_completions::dsl as tc;
    let ids: Vec<String> = rows.iter().map(|(a, _)| a.id.clone()).collect();
    let completions: Vec<(String, String)> = if ids.is_empty() {
        Vec::new()
    } else {
        tc::task_completions
            .filter(tc::assignment_id.eq_any(ids))
            .order(tc::completed_at.desc())
            .select((tc::assignment_id, tc::status))
            .load(conn)?
    };
    let mut latest: HashMap<String, String> = HashMap::new();
    for (aid, status) in completions {
        latest.entry(aid).or_insert(status);
    }
    Ok(rows
        .into_iter()
        .map(|(assignment, task)| {
            let status = latest.get(&assignment.id).cloned();
            AssignmentView {
                assignment,
                task,
                status,
            }
        })
        .collect())
}

fn points_totals(conn: &mut SqliteConnection, child_id: &str) -> Result<PointsTotals, StorageError> {
    use diesel::dsl::sum;
    use schema::{reward_redemptions::dsl as rr, task_completions::dsl as tc};
    let earned: Option<i64> = tc::task_completions
        .filter(tc::child_id.eq(child_id))
        .filter(tc::status.eq(CompletionStatus::Approved.as_str()))
        .select(sum(tc::points_awarded))
        .first::<Option<i64>>(conn)?;
    let spent: Option<i64> = rr::reward_redemptions
        .filter(rr::child_id.eq(child_id))
        .select(sum(rr::cost))
        .first::<Option<i64>>(conn)?;
    Ok(PointsTotals {
        earned: earned.unwrap_or(0),
        spent: spent.unwrap_or(0),
    })
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout.
    // Foreign keys are off by default in SQLite and must be enabled per connection.
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
