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
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Project permission settings.
///
/// `layers` maps a layer id to its published name and capability flags.
/// When `access_control` is enabled, a user's permission on a layer is the
/// union of the permissions of every role the user belongs to; otherwise it
/// follows the layer flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub layers: HashMap<String, LayerSettings>,
    #[serde(default)]
    pub access_control: AccessControl,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerSettings {
    pub name: String,
    /// `insert`, `update`, `delete`, or `edit` for all three.
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoleKind,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub permissions: RolePermissions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleKind {
    Anonymous,
    Authenticated,
    Users,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RolePermissions {
    #[serde(default)]
    pub layers: HashMap<String, LayerPermission>,
}

/// CRUD capability flags of one user on one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerPermission {
    #[serde(default)]
    pub view: bool,
    #[serde(default)]
    pub insert: bool,
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub delete: bool,
}

impl LayerPermission {
    pub const NONE: LayerPermission = LayerPermission {
        view: false,
        insert: false,
        update: false,
        delete: false,
    };

    pub fn union(self, other: LayerPermission) -> LayerPermission {
        LayerPermission {
            view: self.view || other.view,
            insert: self.insert || other.insert,
            update: self.update || other.update,
            delete: self.delete || other.delete,
        }
    }
}

impl Role {
    fn applies_to(&self, user: &User) -> bool {
        match self.kind {
            RoleKind::Anonymous => !user.is_authenticated,
            RoleKind::Authenticated => user.is_authenticated,
            RoleKind::Users => {
                user.is_authenticated && self.users.iter().any(|u| u == &user.username)
            }
        }
    }
}

impl ProjectSettings {
    /// Map a published layer name (or a layer id) to the layer id.
    pub fn layer_id(&self, name: &str) -> Option<&str> {
        if let Some((id, _)) = self.layers.get_key_value(name) {
            return Some(id.as_str());
        }
        self.layers
            .iter()
            .find(|(_, layer)| layer.name == name)
            .map(|(id, _)| id.as_str())
    }

    /// Permission of `user` on the layer with id `layer_id`. Unknown layers
    /// grant nothing.
    pub fn user_layer_permission(&self, user: &User, layer_id: &str) -> LayerPermission {
        let Some(layer) = self.layers.get(layer_id) else {
            return LayerPermission::NONE;
        };

        if self.access_control.enabled {
            return self
                .access_control
                .roles
                .iter()
                .filter(|role| role.applies_to(user))
                .filter_map(|role| role.permissions.layers.get(layer_id))
                .fold(LayerPermission::NONE, |acc, perm| acc.union(*perm));
        }

        let has = |flag: &str| layer.flags.iter().any(|f| f == flag || f == "edit");
        LayerPermission {
            view: !layer.hidden,
            insert: has("insert"),
            update: has("update"),
            delete: has("delete"),
        }
    }
}
