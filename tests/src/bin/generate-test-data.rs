//! Prints SQL filling a fresh database with users, posts and comment threads.
//!
//! Every user's password is their name.

use chrono::{Duration, Utc};
use rand::{seq::SliceRandom, Rng};
use tsuzuri_api::{NewUser, UserId, Uuid};

const NUM_USERS: usize = 5;
const NUM_POSTS: usize = 20;
const MAX_COMMENTS_PER_POST: usize = 60;

const TITLE_WORDS: usize = 6;
const POST_WORDS: usize = 300;
const COMMENT_WORDS: usize = 30;

// Probability for a comment to be a reply, and for a reply to point to a
// comment that no longer exists
const REPLY_PROBABILITY: f64 = 0.7;
const DANGLING_PROBABILITY: f64 = 0.05;

fn sql_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn gen_n_items(table: &str, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    println!("INSERT INTO {} VALUES", table);
    println!("    {}", items.join(",\n    "));
    println!("ON CONFLICT DO NOTHING;");
}

fn main() {
    let mut rng = rand::thread_rng();
    let start = Utc::now() - Duration::days(365);

    let users = (0..NUM_USERS)
        .map(|i| {
            let word = lipsum::lipsum_words_with_rng(&mut rng, 1).to_lowercase();
            let name = word
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .chain(i.to_string().chars())
                .collect::<String>();
            NewUser::with_cost(UserId(Uuid::new_v4()), name.clone(), &name, 4)
        })
        .collect::<Vec<_>>();
    for u in &users {
        println!("-- user {}", u.name);
    }
    gen_n_items(
        "users",
        users
            .iter()
            .map(|u| {
                format!(
                    "('{}', {}, {}, NULL)",
                    u.id.0,
                    sql_str(&u.name),
                    sql_str(&u.initial_password_hash)
                )
            })
            .collect(),
    );

    let mut posts = Vec::new();
    let mut comments = Vec::new();
    for _ in 0..NUM_POSTS {
        let post = Uuid::new_v4();
        let owner = users.choose(&mut rng).expect("there are users").id.0;
        let date = start + Duration::minutes(rng.gen_range(0..60 * 24 * 300));
        let updated = date + Duration::minutes(rng.gen_range(0..60 * 24 * 30));
        posts.push(format!(
            "('{post}', '{owner}', '{}', '{}', {}, {}, NULL)",
            date.to_rfc3339(),
            updated.to_rfc3339(),
            sql_str(&lipsum::lipsum_words_with_rng(&mut rng, TITLE_WORDS)),
            sql_str(&lipsum::lipsum_words_with_rng(&mut rng, POST_WORDS)),
        ));

        // comment dates grow, so that parents are always older than replies
        let mut ids = Vec::new();
        let mut comment_date = date;
        for _ in 0..rng.gen_range(0..MAX_COMMENTS_PER_POST) {
            let id = Uuid::new_v4();
            comment_date += Duration::minutes(rng.gen_range(1..600));
            let parent = if !ids.is_empty() && rng.gen_bool(REPLY_PROBABILITY) {
                if rng.gen_bool(DANGLING_PROBABILITY) {
                    format!("'{}'", Uuid::new_v4())
                } else {
                    format!("'{}'", ids.choose(&mut rng).expect("ids is not empty"))
                }
            } else {
                String::from("NULL")
            };
            let author = users.choose(&mut rng).expect("there are users").id.0;
            let words = rng.gen_range(1..COMMENT_WORDS);
            comments.push(format!(
                "('{id}', '{post}', '{author}', '{}', {parent}, {})",
                comment_date.to_rfc3339(),
                sql_str(&lipsum::lipsum_words_with_rng(&mut rng, words)),
            ));
            ids.push(id);
        }
    }
    gen_n_items("posts", posts);
    gen_n_items("comments", comments);
}
