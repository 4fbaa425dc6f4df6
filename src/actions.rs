//! Action payloads carried on choices and echoed back by the transport.

use std::fmt;
use std::str::FromStr;

use crate::persistence::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCode {
    Refresh,
    CreateRequest,
    MyRequests,
    OpenRequests,
    MyResponses,
    ExitProcess,
    Done,
    Shortcut,
    Edit,
    Cancel,
    Confirm,
    ViewResponses(EntityId),
    CloseRequest(EntityId),
    StopResponses(EntityId),
    ContactSupplier(EntityId),
    SupplierReply(EntityId),
    AdminStats,
    AdminSetRole,
    AdminBroadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action '{0}'")]
pub struct UnknownAction(pub String);

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCode::Refresh => f.write_str("menu:refresh"),
            ActionCode::CreateRequest => f.write_str("menu:create_req"),
            ActionCode::MyRequests => f.write_str("menu:my_req"),
            ActionCode::OpenRequests => f.write_str("menu:open_req"),
            ActionCode::MyResponses => f.write_str("menu:my_resp"),
            ActionCode::ExitProcess => f.write_str("menu:exit_process"),
            ActionCode::Done => f.write_str("wf:done"),
            ActionCode::Shortcut => f.write_str("wf:shortcut"),
            ActionCode::Edit => f.write_str("wf:edit"),
            ActionCode::Cancel => f.write_str("wf:cancel"),
            ActionCode::Confirm => f.write_str("wf:confirm"),
            ActionCode::ViewResponses(id) => write!(f, "req:view:{id}"),
            ActionCode::CloseRequest(id) => write!(f, "req:close:{id}"),
            ActionCode::StopResponses(id) => write!(f, "resp:stop:{id}"),
            ActionCode::ContactSupplier(id) => write!(f, "resp:contact:{id}"),
            ActionCode::SupplierReply(id) => write!(f, "sup:reply:{id}"),
            ActionCode::AdminStats => f.write_str("admin:stats"),
            ActionCode::AdminSetRole => f.write_str("admin:set_role"),
            ActionCode::AdminBroadcast => f.write_str("admin:broadcast"),
        }
    }
}

impl FromStr for ActionCode {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownAction(s.to_string());
        let code = match s {
            "menu:refresh" => ActionCode::Refresh,
            "menu:create_req" => ActionCode::CreateRequest,
            "menu:my_req" => ActionCode::MyRequests,
            "menu:open_req" => ActionCode::OpenRequests,
            "menu:my_resp" => ActionCode::MyResponses,
            "menu:exit_process" => ActionCode::ExitProcess,
            "wf:done" => ActionCode::Done,
            "wf:shortcut" => ActionCode::Shortcut,
            "wf:edit" => ActionCode::Edit,
            "wf:cancel" => ActionCode::Cancel,
            "wf:confirm" => ActionCode::Confirm,
            "admin:stats" => ActionCode::AdminStats,
            "admin:set_role" => ActionCode::AdminSetRole,
            "admin:broadcast" => ActionCode::AdminBroadcast,
            _ => {
                let (prefix, id) = s.rsplit_once(':').ok_or_else(unknown)?;
                let id: EntityId = id.parse().map_err(|_| unknown())?;
                match prefix {
                    "req:view" => ActionCode::ViewResponses(id),
                    "req:close" => ActionCode::CloseRequest(id),
                    "resp:stop" => ActionCode::StopResponses(id),
                    "resp:contact" => ActionCode::ContactSupplier(id),
                    "sup:reply" => ActionCode::SupplierReply(id),
                    _ => return Err(unknown()),
                }
            }
        };
        Ok(code)
    }
}
