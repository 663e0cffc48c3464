// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use crate::auth::User;
use crate::storage::{LayerPermission, ProjectSettings};
use std::collections::HashMap;
use std::fmt;

/// Write action a transaction operation needs permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditAction {
    Insert,
    Update,
    Delete,
}

impl EditAction {
    pub fn allowed_by(self, permission: &LayerPermission) -> bool {
        match self {
            EditAction::Insert => permission.insert,
            EditAction::Update => permission.update,
            EditAction::Delete => permission.delete,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EditAction::Insert => "insert",
            EditAction::Update => "update",
            EditAction::Delete => "delete",
        }
    }
}

impl fmt::Display for EditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strip a namespace prefix: `public:parcels` -> `parcels`.
pub fn layer_identifier(type_name: &str) -> &str {
    type_name.rsplit(':').next().unwrap_or(type_name).trim()
}

/// Permission of `user` on the layer named by `type_name`. Layers that the
/// settings do not know grant nothing.
pub fn resolve(settings: &ProjectSettings, user: &User, type_name: &str) -> LayerPermission {
    match settings.layer_id(layer_identifier(type_name)) {
        Some(id) => settings.user_layer_permission(user, id),
        None => LayerPermission::NONE,
    }
}

/// Request-scoped memo of [`resolve`], keyed by layer identifier.
pub struct PermissionCache<'a> {
    settings: &'a ProjectSettings,
    user: &'a User,
    resolved: HashMap<String, LayerPermission>,
}

impl<'a> PermissionCache<'a> {
    pub fn new(settings: &'a ProjectSettings, user: &'a User) -> Self {
        Self {
            settings,
            user,
            resolved: HashMap::new(),
        }
    }

    pub fn get(&mut self, type_name: &str) -> LayerPermission {
        let ident = layer_identifier(type_name);
        if let Some(permission) = self.resolved.get(ident) {
            return *permission;
        }
        let permission = resolve(self.settings, self.user, ident);
        self.resolved.insert(ident.to_string(), permission);
        permission
    }

    /// Number of distinct layers resolved so far.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}
