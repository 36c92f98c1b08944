use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};

/// Stand-in for the external JWT/RBAC layer (spec.md §1 lists both as
/// out-of-scope collaborators). Nothing below this module depends on how
/// an `Actor` was produced, so swapping this guard for real JWT
/// verification is a localised change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `true` if this actor may act on a resource owned by `owner`.
    pub fn may_access(&self, owner: &str) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Actor {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(user_id) = req.headers().get_one("X-User-Id") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let role = match req.headers().get_one("X-User-Role") {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };
        Outcome::Success(Actor {
            user_id: user_id.to_string(),
            role,
        })
    }
}
