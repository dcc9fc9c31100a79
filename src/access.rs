// src/access.rs - Role hierarchy, route table and action gating
//!
//! Every authorization decision in the portal goes through [`is_authorized`].
//! The role ordinal is private to this module: callers describe what they
//! need as an [`AccessRule`] and never compare roles themselves.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ======== ROLE ========

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, EnumString, Display, AsRefStr,
)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Role {
    LabAssistant,
    Supervisor,
    Manager,
}

impl Role {
    pub fn all() -> [Role; 3] {
        [Role::LabAssistant, Role::Supervisor, Role::Manager]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::LabAssistant => "Lab Assistant",
            Role::Supervisor => "Supervisor",
            Role::Manager => "Manager",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::LabAssistant => "Enters analysis data and submits lab reports",
            Role::Supervisor => "Reviews pending lab reports and approves or rejects them",
            Role::Manager => "Configures plants, products and parameters; manages users",
        }
    }

    const fn bit(self) -> u8 {
        match self {
            Role::LabAssistant => 0b001,
            Role::Supervisor => 0b010,
            Role::Manager => 0b100,
        }
    }
}

/// Hierarchy rank. Only [`is_authorized`] may look at it.
fn ordinal(role: Role) -> u8 {
    match role {
        Role::LabAssistant => 1,
        Role::Supervisor => 2,
        Role::Manager => 3,
    }
}

// ======== ALLOWED ROLE SETS ========

/// A non-empty set of roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedRoles(u8);

impl AllowedRoles {
    /// Returns `None` for an empty slice: an empty allowed-set has no meaning.
    pub fn new(roles: &[Role]) -> Option<Self> {
        let mask = roles.iter().fold(0u8, |mask, role| mask | role.bit());
        if mask == 0 {
            None
        } else {
            Some(Self(mask))
        }
    }

    pub const fn only(role: Role) -> Self {
        Self(role.bit())
    }

    pub const fn with(self, role: Role) -> Self {
        Self(self.0 | role.bit())
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        Role::all().into_iter().filter(move |role| self.contains(*role))
    }
}

/// Decides whether `role` passes a check against `allowed`.
///
/// With `exact` the role must be a member of the set. Otherwise the role must
/// rank at least as high as the lowest-ranked member, so `{supervisor}`
/// admits managers but not lab assistants.
pub fn is_authorized(role: Role, allowed: &AllowedRoles, exact: bool) -> bool {
    if exact {
        return allowed.contains(role);
    }
    allowed
        .iter()
        .map(ordinal)
        .min()
        .map_or(false, |required| ordinal(role) >= required)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRule {
    pub allowed: AllowedRoles,
    pub exact: bool,
}

impl AccessRule {
    pub const fn exactly(allowed: AllowedRoles) -> Self {
        Self { allowed, exact: true }
    }

    pub const fn at_least(role: Role) -> Self {
        Self {
            allowed: AllowedRoles::only(role),
            exact: false,
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        is_authorized(role, &self.allowed, self.exact)
    }
}

// ======== ROUTES ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    SignIn,
    Root,
    ProductManagement,
    UserManagement,
    ManagerDashboard,
    SupervisorDashboard,
    QualityControl,
    Approvals,
    DataEntry,
    Reports,
    Profile,
}

/// Sidebar order.
const MENU: [Route; 9] = [
    Route::DataEntry,
    Route::Reports,
    Route::Profile,
    Route::SupervisorDashboard,
    Route::QualityControl,
    Route::Approvals,
    Route::ManagerDashboard,
    Route::UserManagement,
    Route::ProductManagement,
];

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::SignIn => "/sign-in",
            Route::Root => "/",
            Route::ProductManagement => "/product-management",
            Route::UserManagement => "/user-management",
            Route::ManagerDashboard => "/manager-dashboard",
            Route::SupervisorDashboard => "/supervisor-dashboard",
            Route::QualityControl => "/quality-control",
            Route::Approvals => "/approvals",
            Route::DataEntry => "/lab-assistant/data-entry",
            Route::Reports => "/reports",
            Route::Profile => "/profile",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Route::SignIn => "Sign In",
            Route::Root => "Home",
            Route::ProductManagement => "Product Management",
            Route::UserManagement => "User Management",
            Route::ManagerDashboard => "Manager Dashboard",
            Route::SupervisorDashboard => "Supervisor Dashboard",
            Route::QualityControl => "Quality Control",
            Route::Approvals => "Approvals",
            Route::DataEntry => "Data Entry",
            Route::Reports => "Reports",
            Route::Profile => "Profile",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.split(&['?', '#'][..]).next().unwrap_or("");
        let normalized = match trimmed.trim_end_matches('/') {
            "" => "/",
            other => other,
        };
        [Route::SignIn, Route::Root]
            .into_iter()
            .chain(MENU)
            .find(|route| route.path() == normalized)
    }

    /// `None` for public routes.
    pub fn rule(&self) -> Option<AccessRule> {
        const MANAGER_ONLY: AccessRule = AccessRule::exactly(AllowedRoles::only(Role::Manager));
        match self {
            Route::SignIn => None,
            Route::ProductManagement | Route::UserManagement | Route::ManagerDashboard => Some(MANAGER_ONLY),
            Route::SupervisorDashboard | Route::QualityControl | Route::Approvals => {
                Some(AccessRule::at_least(Role::Supervisor))
            }
            Route::Root | Route::DataEntry | Route::Reports | Route::Profile => {
                Some(AccessRule::at_least(Role::LabAssistant))
            }
        }
    }
}

pub fn default_landing_route(role: Role) -> Route {
    match role {
        Role::Manager => Route::ProductManagement,
        Role::Supervisor => Route::SupervisorDashboard,
        Role::LabAssistant => Route::DataEntry,
    }
}

pub fn visible_routes(role: Role) -> Vec<Route> {
    MENU.into_iter()
        .filter(|route| route.rule().map_or(true, |rule| rule.permits(role)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationDecision {
    Allow,
    /// No principal: go to the sign-in page.
    SignIn,
    /// Authenticated but not allowed here (or at the root): go to the landing route.
    Redirect(Route),
    NotFound,
}

impl NavigationDecision {
    pub fn location(&self) -> Option<&'static str> {
        match self {
            NavigationDecision::SignIn => Some(Route::SignIn.path()),
            NavigationDecision::Redirect(route) => Some(route.path()),
            NavigationDecision::Allow | NavigationDecision::NotFound => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NavigationDecision::Allow => "allow",
            NavigationDecision::SignIn => "sign_in",
            NavigationDecision::Redirect(_) => "redirect",
            NavigationDecision::NotFound => "not_found",
        }
    }
}

pub fn authorize_navigation(role: Option<Role>, path: &str) -> NavigationDecision {
    let route = match Route::from_path(path) {
        Some(route) => route,
        None => return NavigationDecision::NotFound,
    };

    let rule = match route.rule() {
        Some(rule) => rule,
        None => return NavigationDecision::Allow,
    };

    let role = match role {
        Some(role) => role,
        None => return NavigationDecision::SignIn,
    };

    if !rule.permits(role) || route == Route::Root {
        return NavigationDecision::Redirect(default_landing_route(role));
    }

    NavigationDecision::Allow
}

// ======== ACTIONS ========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Action {
    SubmitReport,
    DecideReport,
    ViewReports,
    ManageCatalog,
    ViewCatalog,
    ManageUsers,
    ViewAuditLog,
}

impl Action {
    pub fn all() -> [Action; 7] {
        [
            Action::SubmitReport,
            Action::DecideReport,
            Action::ViewReports,
            Action::ManageCatalog,
            Action::ViewCatalog,
            Action::ManageUsers,
            Action::ViewAuditLog,
        ]
    }

    pub fn rule(&self) -> AccessRule {
        match self {
            Action::SubmitReport => AccessRule::exactly(AllowedRoles::only(Role::LabAssistant)),
            Action::DecideReport => {
                AccessRule::exactly(AllowedRoles::only(Role::Supervisor).with(Role::Manager))
            }
            Action::ManageCatalog | Action::ManageUsers | Action::ViewAuditLog => {
                AccessRule::exactly(AllowedRoles::only(Role::Manager))
            }
            Action::ViewReports | Action::ViewCatalog => AccessRule::at_least(Role::LabAssistant),
        }
    }
}

pub fn can_perform(role: Role, action: Action) -> bool {
    action.rule().permits(role)
}

pub fn allowed_actions(role: Role) -> Vec<Action> {
    Action::all().into_iter().filter(|a| can_perform(role, *a)).collect()
}
