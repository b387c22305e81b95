/// UUID を包む ID 型を定義する
///
/// 通知種別・購読・通知・送信タスク・ユーザーの ID はすべて UUID v7 で採番し、
/// DB との受け渡しでは `as_uuid` / `from_uuid`、CLI や設定値からは `FromStr` を使う。
/// 型が別々なので、購読 ID を通知 ID の位置に渡すような取り違えはコンパイルエラーになる。
///
/// ```rust
/// use notiflow_domain::user::UserId;
///
/// let id = UserId::new();
/// let parsed: UserId = id.to_string().parse().unwrap();
/// assert_eq!(parsed, UserId::from_uuid(*id.as_uuid()));
/// ```
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
            derive_more::Display,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        $vis struct $Name(uuid::Uuid);

        impl $Name {
            /// UUID v7 で採番する（生成順に並ぶ）
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $Name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::str::FromStr for $Name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s.trim()).map(Self)
            }
        }
    };
}
